//! [`DriftDetector`] – per-frame, read-only invariant scan.
//!
//! For every governed node, in registry order, the first matching condition
//! wins:
//!
//! | Condition | Event |
//! |---|---|
//! | node destroyed/disabled | [`DriftKind::Missing`] (once per disappearance) |
//! | actual parent ≠ declared parent, declared parent still alive | [`DriftKind::Ownership`] |
//! | declared parent destroyed/disabled | [`DriftKind::Missing`] (once per disappearance) |
//! | non-finite component, degenerate rotation, or `|position|` above the sanity ceiling | [`DriftKind::Invalid`] |
//! | `|position − canonical| > tolerance` (unless suspended by a reset) | [`DriftKind::Magnitude`] |
//!
//! The returned events are ordered by repair priority: every ownership event
//! first, then invalid, then magnitude, then missing.

use std::collections::HashSet;

use rigwarden_spatial::{PoseNode, PoseTree};
use rigwarden_types::{DriftEvent, DriftKind};
use tracing::{info, trace, warn};

use crate::invariant_registry::{Invariant, InvariantRegistry};
use crate::reset_coordinator::ResetCoordinator;

/// Largest believable local position magnitude, in metres.
pub const DEFAULT_SANITY_CEILING: f32 = 1_000.0;

/// Scans a [`PoseTree`] against an [`InvariantRegistry`].
///
/// The only state it keeps is the set of nodes already reported missing, so
/// a vanished node is reported once rather than every frame.
#[derive(Debug)]
pub struct DriftDetector {
    sanity_ceiling: f32,
    missing: HashSet<String>,
}

impl DriftDetector {
    pub fn new(sanity_ceiling: f32) -> Self {
        Self {
            sanity_ceiling,
            missing: HashSet::new(),
        }
    }

    pub fn sanity_ceiling(&self) -> f32 {
        self.sanity_ceiling
    }

    /// `true` if `node` has been reported missing and has not reappeared.
    pub fn is_missing(&self, node: &str) -> bool {
        self.missing.contains(node)
    }

    /// Scan every governed node and return the violations found, in repair
    /// priority order.  `frame` is stamped on each event.
    pub fn scan(
        &mut self,
        frame: u64,
        tree: &PoseTree,
        registry: &InvariantRegistry,
        gate: &ResetCoordinator,
    ) -> Vec<DriftEvent> {
        let mut events = Vec::new();
        for inv in registry.iter() {
            if let Some(event) = self.check(frame, tree, inv, gate) {
                events.push(event);
            }
        }
        // Stable: keeps registry order within a kind.
        events.sort_by_key(|e| e.kind);
        events
    }

    fn check(
        &mut self,
        frame: u64,
        tree: &PoseTree,
        inv: &Invariant,
        gate: &ResetCoordinator,
    ) -> Option<DriftEvent> {
        let name = inv.target_node.as_str();
        let tolerance = inv.max_allowed_local_displacement;

        let Some(node) = tree
            .find(name)
            .and_then(|id| tree.get(id))
            .filter(|n| n.is_active())
        else {
            return self.report_missing(frame, name, tolerance);
        };

        // A stolen node can go home as long as its declared parent exists,
        // enabled or not.
        let declared = node.declared_parent();
        if declared.is_none_or(|p| tree.contains(p)) && node.parent() != declared {
            self.mark_present(name);
            return Some(DriftEvent::new(
                frame,
                name,
                DriftKind::Ownership,
                finite(node.displacement()),
                tolerance,
            ));
        }
        if !declared.is_none_or(|p| tree.is_active_in_hierarchy(p)) {
            return self.report_missing(frame, name, tolerance);
        }
        self.mark_present(name);

        if !self.is_sane(node) {
            return Some(DriftEvent::new(
                frame,
                name,
                DriftKind::Invalid,
                finite(node.displacement()),
                tolerance,
            ));
        }

        let d = node.displacement();
        if d > tolerance {
            if gate.permits(name, DriftKind::Magnitude) {
                return Some(DriftEvent::new(frame, name, DriftKind::Magnitude, Some(d), tolerance));
            }
            trace!(node = name, displacement = d, "magnitude check suspended during reset");
        }
        None
    }

    /// Report once; stay quiet until the node comes back.
    fn report_missing(&mut self, frame: u64, name: &str, tolerance: f32) -> Option<DriftEvent> {
        if !self.missing.insert(name.to_string()) {
            return None;
        }
        warn!(node = name, "governed node missing; checks suspended until it reappears");
        Some(DriftEvent::new(frame, name, DriftKind::Missing, None, tolerance))
    }

    fn mark_present(&mut self, name: &str) {
        if self.missing.remove(name) {
            info!(node = name, "governed node reappeared; checks resumed");
        }
    }

    fn is_sane(&self, node: &PoseNode) -> bool {
        let position = node.local_position();
        let rotation = node.local_rotation();
        position.is_finite()
            && rotation.is_finite()
            && rotation.dot(rotation) > 1e-6
            && position.length() <= self.sanity_ceiling
    }
}

impl Default for DriftDetector {
    fn default() -> Self {
        Self::new(DEFAULT_SANITY_CEILING)
    }
}

fn finite(v: f32) -> Option<f32> {
    v.is_finite().then_some(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::{NodeSpec, RigBlueprint};
    use rigwarden_spatial::{Pose, Quaternion, Vec3};
    use rigwarden_types::RecoveryPolicy;

    fn rig() -> (PoseTree, InvariantRegistry) {
        RigBlueprint::new(vec![
            NodeSpec::ungoverned("rig", None, Vec3::zero()),
            NodeSpec::ungoverned("elsewhere", None, Vec3::new(10.0, 0.0, 0.0)),
            NodeSpec::governed(
                "head",
                Some("rig"),
                Vec3::new(0.0, 1.6, 0.0),
                0.2,
                RecoveryPolicy::SmoothToCanonical,
            ),
            NodeSpec::governed(
                "chest",
                Some("rig"),
                Vec3::new(0.0, 1.3, 0.0),
                0.1,
                RecoveryPolicy::SnapToCanonical,
            ),
        ])
        .unwrap()
        .instantiate()
        .unwrap()
    }

    fn id(tree: &PoseTree, name: &str) -> rigwarden_spatial::NodeId {
        tree.find(name).unwrap()
    }

    #[test]
    fn compliant_tree_yields_no_events() {
        let (tree, registry) = rig();
        let mut detector = DriftDetector::default();
        assert!(detector.scan(0, &tree, &registry, &ResetCoordinator::default()).is_empty());
    }

    #[test]
    fn displacement_within_tolerance_is_compliant() {
        let (mut tree, registry) = rig();
        let chest = id(&tree, "chest");
        tree.set_local_position(chest, Vec3::new(0.0, 1.3, 0.0625)).unwrap();
        let mut detector = DriftDetector::default();
        assert!(detector.scan(0, &tree, &registry, &ResetCoordinator::default()).is_empty());
    }

    #[test]
    fn magnitude_reports_observed_displacement() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        tree.set_local_position(head, Vec3::new(0.0, 1.9, 0.0)).unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(3, &tree, &registry, &ResetCoordinator::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DriftKind::Magnitude);
        assert_eq!(events[0].frame, 3);
        assert!((events[0].observed_displacement.unwrap() - 0.3).abs() < 1e-4);
    }

    #[test]
    fn ownership_outranks_other_violations() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        let elsewhere = id(&tree, "elsewhere");
        tree.attach(head, Some(elsewhere)).unwrap();
        tree.set_local_position(head, Vec3::new(f32::NAN, 0.0, 0.0)).unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &ResetCoordinator::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DriftKind::Ownership);
        assert!(events[0].observed_displacement.is_none());
    }

    #[test]
    fn non_finite_and_out_of_range_are_invalid() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        let chest = id(&tree, "chest");
        tree.set_local_position(head, Vec3::new(0.0, f32::INFINITY, 0.0)).unwrap();
        tree.set_local_position(chest, Vec3::new(0.0, 5_000.0, 0.0)).unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &ResetCoordinator::default());
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == DriftKind::Invalid));
    }

    #[test]
    fn degenerate_rotation_is_invalid() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        tree.set_local_pose(
            head,
            Pose::new(Vec3::new(0.0, 1.6, 0.0), Quaternion::new(0.0, 0.0, 0.0, 0.0)),
        )
        .unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &ResetCoordinator::default());
        assert_eq!(events[0].kind, DriftKind::Invalid);
    }

    #[test]
    fn events_sorted_by_priority() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        let chest = id(&tree, "chest");
        let elsewhere = id(&tree, "elsewhere");
        // head (declared first) drifts, chest (declared second) is stolen.
        tree.set_local_position(head, Vec3::new(0.0, 2.0, 0.0)).unwrap();
        tree.attach(chest, Some(elsewhere)).unwrap();
        let mut detector = DriftDetector::default();
        let kinds: Vec<DriftKind> = detector
            .scan(0, &tree, &registry, &ResetCoordinator::default())
            .iter()
            .map(|e| e.kind)
            .collect();
        assert_eq!(kinds, vec![DriftKind::Ownership, DriftKind::Magnitude]);
    }

    #[test]
    fn missing_reported_once_until_reappearance() {
        let (mut tree, registry) = rig();
        let chest = id(&tree, "chest");
        tree.set_active(chest, false).unwrap();
        let mut detector = DriftDetector::default();
        let gate = ResetCoordinator::default();

        let first = detector.scan(0, &tree, &registry, &gate);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].kind, DriftKind::Missing);
        assert!(detector.is_missing("chest"));
        assert!(detector.scan(1, &tree, &registry, &gate).is_empty());
        assert!(detector.scan(2, &tree, &registry, &gate).is_empty());

        tree.set_active(chest, true).unwrap();
        assert!(detector.scan(3, &tree, &registry, &gate).is_empty());
        assert!(!detector.is_missing("chest"));

        // A second disappearance is reported again.
        tree.despawn(chest).unwrap();
        assert_eq!(detector.scan(4, &tree, &registry, &gate).len(), 1);
    }

    #[test]
    fn destroyed_declared_parent_is_missing() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        let rig_id = id(&tree, "rig");
        let elsewhere = id(&tree, "elsewhere");
        tree.attach(head, Some(elsewhere)).unwrap();
        tree.despawn(rig_id).unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &ResetCoordinator::default());
        // chest went down with rig; head survives but its declared parent did not.
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == DriftKind::Missing));
    }

    #[test]
    fn stolen_node_under_disabled_declared_parent_is_ownership() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        tree.attach(head, Some(id(&tree, "elsewhere"))).unwrap();
        tree.set_active(id(&tree, "rig"), false).unwrap();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &ResetCoordinator::default());
        let kinds: Vec<(&str, DriftKind)> =
            events.iter().map(|e| (e.node.as_str(), e.kind)).collect();
        assert_eq!(
            kinds,
            vec![("head", DriftKind::Ownership), ("chest", DriftKind::Missing)]
        );
        assert!(!detector.is_missing("head"));
    }

    #[test]
    fn reset_suspends_magnitude_for_exempt_nodes_only() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        let chest = id(&tree, "chest");
        tree.set_local_position(head, Vec3::new(5.0, 1.6, 0.0)).unwrap();
        tree.set_local_position(chest, Vec3::new(0.0, 2.0, 0.0)).unwrap();
        let mut gate = ResetCoordinator::new(["head"]);
        gate.begin_reset();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &gate);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].node, "chest");
    }

    #[test]
    fn reset_does_not_suspend_invalid() {
        let (mut tree, registry) = rig();
        let head = id(&tree, "head");
        tree.set_local_position(head, Vec3::new(f32::NAN, 1.6, 0.0)).unwrap();
        let mut gate = ResetCoordinator::new(["head"]);
        gate.begin_reset();
        let mut detector = DriftDetector::default();
        let events = detector.scan(0, &tree, &registry, &gate);
        assert_eq!(events[0].kind, DriftKind::Invalid);
    }
}
