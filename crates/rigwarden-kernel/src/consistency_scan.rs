//! [`ConsistencyScanner`] – time-throttled full-tree audit.
//!
//! The per-frame detector only looks at governed nodes.  Structural damage
//! elsewhere (child lists pointing at destroyed nodes, parents that forgot a
//! child, stale name entries) and registry/tree disagreements are swept up
//! here on a fixed interval instead.  Link damage is repaired in place;
//! everything else is reported.

use std::time::{Duration, Instant};

use rigwarden_spatial::PoseTree;
use rigwarden_spatial::pose_tree::TreeAudit;
use tracing::{debug, warn};

use crate::invariant_registry::InvariantRegistry;

/// Result of one full-tree scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    /// Link damage found before repair.
    pub audit: TreeAudit,
    /// Fixes applied by [`PoseTree::repair_links`].
    pub links_repaired: usize,
    /// Governed nodes not present in the tree.
    pub absent: Vec<String>,
    /// Governed nodes whose declared parent no longer exists.
    pub orphaned: Vec<String>,
    /// Governed nodes whose canonical pose or tolerance differs from the
    /// registry, e.g. after a host respawned them with other data.
    pub canonical_mismatches: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.audit.is_clean()
            && self.absent.is_empty()
            && self.orphaned.is_empty()
            && self.canonical_mismatches.is_empty()
    }
}

/// Runs a [`ConsistencyReport`] scan at most once per interval.
#[derive(Debug, Clone)]
pub struct ConsistencyScanner {
    interval: Duration,
    last_run: Option<Instant>,
}

impl ConsistencyScanner {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// `true` when no scan has run yet or the interval has elapsed.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_run
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Scan if due, otherwise `None`.
    pub fn run_if_due(
        &mut self,
        now: Instant,
        tree: &mut PoseTree,
        registry: &InvariantRegistry,
    ) -> Option<ConsistencyReport> {
        self.is_due(now).then(|| self.run(now, tree, registry))
    }

    /// Scan unconditionally and restart the interval at `now`.
    pub fn run(
        &mut self,
        now: Instant,
        tree: &mut PoseTree,
        registry: &InvariantRegistry,
    ) -> ConsistencyReport {
        self.last_run = Some(now);

        let audit = tree.audit();
        let links_repaired = if audit.is_clean() { 0 } else { tree.repair_links() };

        let mut report = ConsistencyReport {
            audit,
            links_repaired,
            ..Default::default()
        };

        for inv in registry.iter() {
            let name = &inv.target_node;
            let Some(node) = tree.find(name).and_then(|id| tree.get(id)) else {
                report.absent.push(name.clone());
                continue;
            };
            if inv.declared_parent.is_some()
                && node.declared_parent().is_none_or(|p| !tree.contains(p))
            {
                report.orphaned.push(name.clone());
            }
            if node.canonical_local_pose() != inv.canonical_local_pose
                || node.tolerance_radius() != inv.max_allowed_local_displacement
            {
                report.canonical_mismatches.push(name.clone());
            }
        }

        if report.is_clean() {
            debug!("consistency scan clean");
        } else {
            warn!(
                links_repaired = report.links_repaired,
                absent = ?report.absent,
                orphaned = ?report.orphaned,
                mismatched = ?report.canonical_mismatches,
                "consistency scan found problems"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::RigBlueprint;
    use rigwarden_spatial::{Pose, Quaternion, Vec3};

    fn humanoid() -> (PoseTree, InvariantRegistry) {
        RigBlueprint::humanoid().instantiate().unwrap()
    }

    #[test]
    fn first_scan_is_due_immediately() {
        let scanner = ConsistencyScanner::new(Duration::from_secs(1));
        assert!(scanner.is_due(Instant::now()));
    }

    #[test]
    fn scans_are_throttled_by_interval() {
        let (mut tree, registry) = humanoid();
        let mut scanner = ConsistencyScanner::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(scanner.run_if_due(t0, &mut tree, &registry).is_some());
        assert!(scanner.run_if_due(t0 + Duration::from_millis(100), &mut tree, &registry).is_none());
        assert!(scanner.run_if_due(t0 + Duration::from_millis(499), &mut tree, &registry).is_none());
        assert!(scanner.run_if_due(t0 + Duration::from_millis(500), &mut tree, &registry).is_some());
    }

    #[test]
    fn intact_rig_is_clean() {
        let (mut tree, registry) = humanoid();
        let mut scanner = ConsistencyScanner::new(Duration::from_secs(1));
        let report = scanner.run(Instant::now(), &mut tree, &registry);
        assert!(report.is_clean());
        assert_eq!(report.links_repaired, 0);
    }

    #[test]
    fn despawned_nodes_reported_absent() {
        let (mut tree, registry) = humanoid();
        let chest = tree.find("avatar_chest").unwrap();
        tree.despawn(chest).unwrap();
        let mut scanner = ConsistencyScanner::new(Duration::from_secs(1));
        let report = scanner.run(Instant::now(), &mut tree, &registry);
        assert_eq!(report.absent, vec!["avatar_chest", "avatar_head_anchor"]);
        assert!(report.audit.is_clean());
    }

    #[test]
    fn node_outliving_declared_parent_is_orphaned() {
        let (mut tree, registry) = humanoid();
        let head = tree.find("head").unwrap();
        let visual_root = tree.find("avatar_visual_root").unwrap();
        let camera_offset = tree.find("camera_offset").unwrap();
        tree.attach(head, Some(visual_root)).unwrap();
        tree.despawn(camera_offset).unwrap();

        let mut scanner = ConsistencyScanner::new(Duration::from_secs(1));
        let report = scanner.run(Instant::now(), &mut tree, &registry);
        assert_eq!(report.orphaned, vec!["head"]);
        assert_eq!(report.absent, vec!["camera_offset"]);
    }

    #[test]
    fn respawn_with_other_tolerance_is_mismatched() {
        let (mut tree, registry) = humanoid();
        let chest = tree.find("avatar_chest").unwrap();
        let hips = tree.find("avatar_hips").unwrap();
        tree.despawn(chest).unwrap();
        tree.spawn(
            "avatar_chest",
            Some(hips),
            Pose::new(Vec3::new(0.0, 0.35, 0.0), Quaternion::identity()),
            0.5,
        )
        .unwrap();

        let mut scanner = ConsistencyScanner::new(Duration::from_secs(1));
        let report = scanner.run(Instant::now(), &mut tree, &registry);
        assert_eq!(report.canonical_mismatches, vec!["avatar_chest"]);
        // The anchor went down with the old chest and was not respawned.
        assert_eq!(report.absent, vec!["avatar_head_anchor"]);
    }
}
