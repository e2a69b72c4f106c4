//! [`Corrector`] – the only writer of governed node poses.
//!
//! Consumes the events of one [`DriftDetector`][crate::DriftDetector] scan
//! (already in priority order) and repairs them:
//!
//! - **Ownership** – re-attach to the declared parent, reset to canonical.
//! - **Invalid** – restore the last known-good local pose, or canonical when
//!   none was ever recorded.  A bad value is never interpolated from.
//! - **Magnitude** – snap when the policy says so or the drift is gross
//!   (`d > gross_factor × tolerance`); otherwise take one convergence step.
//!   The first step always lands inside the tolerance radius; the node then
//!   keeps converging on later frames until it settles on canonical.
//!   Near the gross boundary that clamp removes most of the error in a single
//!   frame: every idle pass must end within tolerance, so only the residual
//!   inside `FIRST_STEP_MARGIN × tolerance` is smoothed.
//! - **Missing** – forget everything cached for the node.
//!
//! After the events, nodes still converging take their next step, and the
//! known-good cache is refreshed from every valid governed node that sits
//! within its tolerance radius.
//!
//! On a compliant tree with nothing converging, [`Corrector::apply`] writes
//! nothing.

use std::collections::{HashMap, HashSet};

use rigwarden_spatial::{NodeId, Pose, PoseTree};
use rigwarden_types::{CorrectiveAction, DriftEvent, DriftKind, RecoveryPolicy, WardenError};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::drift_detector::DEFAULT_SANITY_CEILING;
use crate::invariant_registry::{Invariant, InvariantRegistry};
use crate::reset_coordinator::ResetCoordinator;

/// Fraction of the tolerance radius the first smoothing step must reach.
const FIRST_STEP_MARGIN: f32 = 0.9;

/// Rotation residual (radians) below which a converging node may settle.
/// Coarser than the position epsilon: `acos` near 1 is noisy in `f32`.
const SETTLE_ANGLE_RAD: f32 = 5e-3;

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tunable thresholds of the correction policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    /// Drift beyond `gross_factor × tolerance` snaps regardless of policy.
    pub gross_factor: f32,
    /// Fraction of the remaining error removed per smoothing step, in `(0, 1]`.
    pub convergence_per_frame: f32,
    /// Position residual (metres) below which a converging node is snapped
    /// exactly onto canonical.
    pub settle_epsilon: f32,
    /// Largest believable local position magnitude, in metres.
    pub sanity_ceiling: f32,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            gross_factor: 10.0,
            convergence_per_frame: 0.5,
            settle_epsilon: 1e-3,
            sanity_ceiling: DEFAULT_SANITY_CEILING,
        }
    }
}

impl CorrectionConfig {
    /// Reject thresholds the correction policy cannot work with.
    pub fn validate(&self) -> Result<(), WardenError> {
        if !(self.gross_factor.is_finite() && self.gross_factor >= 1.0) {
            return Err(WardenError::Config(format!(
                "gross_factor must be at least 1, got {}",
                self.gross_factor
            )));
        }
        if !(self.convergence_per_frame > 0.0 && self.convergence_per_frame <= 1.0) {
            return Err(WardenError::Config(format!(
                "convergence_per_frame must be in (0, 1], got {}",
                self.convergence_per_frame
            )));
        }
        if !(self.settle_epsilon.is_finite() && self.settle_epsilon > 0.0) {
            return Err(WardenError::Config(format!(
                "settle_epsilon must be positive, got {}",
                self.settle_epsilon
            )));
        }
        if !(self.sanity_ceiling.is_finite() && self.sanity_ceiling > 0.0) {
            return Err(WardenError::Config(format!(
                "sanity_ceiling must be positive, got {}",
                self.sanity_ceiling
            )));
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Summary
// ────────────────────────────────────────────────────────────────────────────

/// What one [`Corrector::apply`] pass did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionSummary {
    /// Events that led to a pose or ownership write.
    pub corrections: usize,
    /// Steps taken by nodes converging from an earlier frame.
    pub convergence_steps: usize,
    /// Nodes that finished converging and now sit exactly on canonical.
    pub settled: Vec<String>,
    /// Repairs that could not be applied.
    pub failures: Vec<WardenError>,
}

impl CorrectionSummary {
    /// `true` when the pass touched nothing.
    pub fn is_noop(&self) -> bool {
        self.corrections == 0 && self.convergence_steps == 0 && self.failures.is_empty()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Corrector
// ────────────────────────────────────────────────────────────────────────────

/// Applies repairs chosen by each node's [`RecoveryPolicy`].
#[derive(Debug, Default)]
pub struct Corrector {
    config: CorrectionConfig,
    /// Last valid local pose seen per governed node.
    known_good: HashMap<String, Pose>,
    /// Nodes smoothing towards canonical over several frames.
    converging: HashSet<String>,
}

impl Corrector {
    pub fn new(config: CorrectionConfig) -> Self {
        Self {
            config,
            known_good: HashMap::new(),
            converging: HashSet::new(),
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    pub fn known_good(&self, node: &str) -> Option<Pose> {
        self.known_good.get(node).copied()
    }

    pub fn is_converging(&self, node: &str) -> bool {
        self.converging.contains(node)
    }

    /// Repair every event in order, filling in each event's action, then
    /// advance converging nodes and refresh the known-good cache.
    pub fn apply(
        &mut self,
        tree: &mut PoseTree,
        registry: &InvariantRegistry,
        gate: &ResetCoordinator,
        events: &mut [DriftEvent],
    ) -> CorrectionSummary {
        let mut summary = CorrectionSummary::default();
        let mut touched = HashSet::new();

        for event in events.iter_mut() {
            touched.insert(event.node.clone());
            let Some(inv) = registry.get(&event.node) else {
                summary.failures.push(WardenError::UnknownNode(event.node.clone()));
                continue;
            };
            match self.repair(tree, inv, event.kind) {
                Ok(action) => {
                    event.action = action;
                    if action != CorrectiveAction::ChecksSuspended {
                        summary.corrections += 1;
                    }
                    debug!(node = %event.node, kind = ?event.kind, ?action, "corrected drift");
                }
                Err(e) => {
                    warn!(node = %event.node, kind = ?event.kind, error = %e, "correction failed");
                    summary.failures.push(e);
                }
            }
        }

        self.continue_convergence(tree, registry, gate, &touched, &mut summary);
        self.record_known_good(tree, registry);
        summary
    }

    fn repair(
        &mut self,
        tree: &mut PoseTree,
        inv: &Invariant,
        kind: DriftKind,
    ) -> Result<CorrectiveAction, WardenError> {
        let name = inv.target_node.as_str();
        if kind == DriftKind::Missing {
            self.known_good.remove(name);
            self.converging.remove(name);
            return Ok(CorrectiveAction::ChecksSuspended);
        }

        let id = tree
            .find(name)
            .ok_or_else(|| WardenError::MissingNode(name.to_string()))?;

        match kind {
            DriftKind::Ownership => {
                let declared = tree
                    .get(id)
                    .and_then(|n| n.declared_parent())
                    .filter(|p| tree.contains(*p));
                if declared.is_none() && inv.declared_parent.is_some() {
                    return Err(WardenError::MissingNode(
                        inv.declared_parent.clone().unwrap_or_default(),
                    ));
                }
                tree.attach(id, declared)?;
                tree.set_local_pose(id, inv.canonical_local_pose)?;
                self.converging.remove(name);
                Ok(CorrectiveAction::Reparented)
            }
            DriftKind::Invalid => {
                self.converging.remove(name);
                match self.known_good.get(name) {
                    Some(pose) => {
                        tree.set_local_pose(id, *pose)?;
                        Ok(CorrectiveAction::RestoredKnownGood)
                    }
                    None => {
                        tree.set_local_pose(id, inv.canonical_local_pose)?;
                        Ok(CorrectiveAction::RestoredCanonical)
                    }
                }
            }
            DriftKind::Magnitude => {
                let current = tree
                    .local_pose(id)
                    .ok_or_else(|| WardenError::MissingNode(name.to_string()))?;
                let d = current.position.distance(inv.canonical_local_pose.position);
                let gross = d > self.config.gross_factor * inv.max_allowed_local_displacement;
                if gross || inv.recovery_policy == RecoveryPolicy::SnapToCanonical {
                    tree.set_local_pose(id, inv.canonical_local_pose)?;
                    self.converging.remove(name);
                    Ok(CorrectiveAction::Snapped)
                } else {
                    self.smooth_step(tree, id, inv, current)
                }
            }
            DriftKind::Missing => Ok(CorrectiveAction::ChecksSuspended),
        }
    }

    /// Move one step towards canonical, never ending outside
    /// `FIRST_STEP_MARGIN × tolerance`.
    fn smooth_step(
        &mut self,
        tree: &mut PoseTree,
        id: NodeId,
        inv: &Invariant,
        current: Pose,
    ) -> Result<CorrectiveAction, WardenError> {
        let name = inv.target_node.as_str();
        let target = inv.canonical_local_pose;
        let t = self.config.convergence_per_frame;

        let mut position = current.position.lerp(target.position, t);
        let rotation = current.rotation.slerp(target.rotation, t).normalize();

        let limit = FIRST_STEP_MARGIN * inv.max_allowed_local_displacement;
        let residual = position.distance(target.position);
        if residual > limit {
            let offset = position.sub(target.position).scale(limit / residual);
            position = target.position.add(offset);
        }

        let residual = position.distance(target.position);
        if residual < self.config.settle_epsilon
            && rotation.angle_to(target.rotation) < SETTLE_ANGLE_RAD
        {
            tree.set_local_pose(id, target)?;
            self.converging.remove(name);
            trace!(node = name, "settled on canonical");
            return Ok(CorrectiveAction::Snapped);
        }

        tree.set_local_pose(id, Pose::new(position, rotation))?;
        self.converging.insert(name.to_string());
        Ok(CorrectiveAction::Smoothing {
            remaining: residual,
        })
    }

    fn continue_convergence(
        &mut self,
        tree: &mut PoseTree,
        registry: &InvariantRegistry,
        gate: &ResetCoordinator,
        touched: &HashSet<String>,
        summary: &mut CorrectionSummary,
    ) {
        let mut pending: Vec<String> = self
            .converging
            .iter()
            .filter(|n| !touched.contains(*n))
            .cloned()
            .collect();
        pending.sort();

        for name in pending {
            if !gate.permits(&name, DriftKind::Magnitude) {
                // Exempt during a reset: the reset owns this node's pose.
                self.converging.remove(&name);
                continue;
            }
            let (Some(inv), Some(id)) = (registry.get(&name), tree.find(&name)) else {
                self.converging.remove(&name);
                continue;
            };
            let Some(current) = tree.local_pose(id).filter(|p| p.is_finite()) else {
                self.converging.remove(&name);
                continue;
            };
            match self.smooth_step(tree, id, inv, current) {
                Ok(action) => {
                    summary.convergence_steps += 1;
                    if action == CorrectiveAction::Snapped {
                        summary.settled.push(name);
                    }
                }
                Err(e) => {
                    self.converging.remove(&name);
                    summary.failures.push(e);
                }
            }
        }
    }

    fn record_known_good(&mut self, tree: &PoseTree, registry: &InvariantRegistry) {
        for inv in registry.iter() {
            let name = inv.target_node.as_str();
            let Some(node) = tree.find(name).and_then(|id| tree.get(id)) else {
                continue;
            };
            let pose = node.local_pose();
            // Out-of-tolerance poses (e.g. an exempt node mid-reset) are never
            // worth restoring to.
            let valid = node.is_active()
                && node.parent() == node.declared_parent()
                && pose.is_finite()
                && pose.position.length() <= self.config.sanity_ceiling
                && node.displacement() <= inv.max_allowed_local_displacement;
            if valid {
                self.known_good.insert(name.to_string(), pose);
            }
        }
    }
}
