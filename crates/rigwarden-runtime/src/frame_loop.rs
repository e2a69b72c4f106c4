//! [`FrameLoop`] – the per-frame orchestrator.
//!
//! The host calls [`FrameLoop::late_update`] once per rendered frame, after
//! the engine and the redirection collaborator have moved things around.
//! Each call runs, in order:
//!
//! 1. **Reset gate** – drain the collaborator's reset signals into the
//!    [`ResetCoordinator`], then reconcile with its in-progress flag.
//! 2. **Detect** – [`DriftDetector::scan`] over every governed node.
//! 3. **Correct** – [`Corrector::apply`] ownership, then invalid, then
//!    magnitude repairs.
//! 4. **Report** – every event goes to the [`DriftLog`] and the
//!    [`DiagnosticsBus`].
//! 5. **Consistency** – the throttled full-tree scan, plus a divergence check
//!    between the tree's head and the collaborator's head.
//! 6. **Rebase** – the [`VisualRebaser`] places the avatar under the
//!    validated head.
//!
//! Nothing here is fatal.  A failing collaborator or an unrepairable node is
//! recorded in the [`FrameReport`] and the avatar stays where it last was.

use std::time::{Duration, Instant};

use rigwarden_kernel::{
    ConsistencyReport, ConsistencyScanner, CorrectionConfig, CorrectionSummary, Corrector,
    DriftDetector, InvariantRegistry, ResetCoordinator, RigBlueprint,
};
use rigwarden_middleware::{DiagnosticsBus, DriftLog};
use rigwarden_spatial::{NodeId, Pose, PoseTree};
use rigwarden_types::{CorrectiveAction, DriftEvent, DriftKind, ResetPhase, WardenError};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::redirection::RedirectionSource;
use crate::visual_rebaser::VisualRebaser;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration bundle for [`FrameLoop`].
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLoopConfig {
    /// Node whose world pose drives the avatar.
    pub head_node: String,
    /// Ungoverned node the rebaser writes.
    pub visual_root_node: String,
    /// Nodes whose magnitude checks are suspended while a reset runs.
    pub reset_exempt: Vec<String>,
    pub consistency_interval: Duration,
    /// World Y of the floor the avatar stands on.
    pub ground_height: f32,
    /// Minimum flattened-forward length for a heading update.
    pub heading_epsilon: f32,
    /// Distance (metres) between the tree's head and the collaborator's head
    /// above which the consistency scan warns.
    pub divergence_warning: f32,
    /// Events retained by the [`DriftLog`].
    pub log_capacity: usize,
}

impl Default for FrameLoopConfig {
    fn default() -> Self {
        Self {
            head_node: "head".to_string(),
            visual_root_node: "avatar_visual_root".to_string(),
            reset_exempt: vec!["head".to_string(), "avatar_visual_root".to_string()],
            consistency_interval: Duration::from_millis(500),
            ground_height: 0.0,
            heading_epsilon: 1e-3,
            divergence_warning: 0.25,
            log_capacity: 512,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameReport
// ─────────────────────────────────────────────────────────────────────────────

/// Everything one [`FrameLoop::late_update`] call did.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    /// Reset phase the frame ran under.
    pub phase: ResetPhase,
    /// Detected violations with the action taken for each.
    pub events: Vec<DriftEvent>,
    pub corrections: CorrectionSummary,
    /// Present on frames where the consistency scan ran.
    pub consistency: Option<ConsistencyReport>,
    /// Distance between the tree's head and the collaborator's head, when
    /// measured this frame.
    pub head_divergence: Option<f32>,
    /// `true` when the avatar visual root was moved.
    pub rebased: bool,
    pub collaborator_errors: Vec<WardenError>,
}

impl FrameReport {
    /// `true` when nothing had to be detected, corrected or reported.
    pub fn is_quiet(&self) -> bool {
        self.events.is_empty()
            && self.corrections.is_noop()
            && self.collaborator_errors.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FrameLoop
// ─────────────────────────────────────────────────────────────────────────────

/// Owns the pose tree and every warden component.
///
/// # Example
///
/// ```rust
/// use std::time::Instant;
/// use rigwarden_kernel::{CorrectionConfig, RigBlueprint};
/// use rigwarden_runtime::{FrameLoop, FrameLoopConfig, SimRedirection};
///
/// let mut warden = FrameLoop::new(
///     &RigBlueprint::humanoid(),
///     FrameLoopConfig::default(),
///     CorrectionConfig::default(),
///     Box::new(SimRedirection::default()),
/// )
/// .unwrap();
///
/// let report = warden.late_update(Instant::now());
/// assert!(report.events.is_empty());
/// assert!(report.rebased);
/// ```
pub struct FrameLoop {
    config: FrameLoopConfig,
    blueprint: RigBlueprint,
    tree: PoseTree,
    registry: InvariantRegistry,
    detector: DriftDetector,
    corrector: Corrector,
    reset: ResetCoordinator,
    scanner: ConsistencyScanner,
    rebaser: VisualRebaser,
    source: Box<dyn RedirectionSource>,
    bus: DiagnosticsBus,
    log: DriftLog,
    frame: u64,
}

impl FrameLoop {
    /// Instantiate `blueprint` and wire every component around it.
    ///
    /// # Errors
    ///
    /// - [`WardenError::Config`] – bad thresholds, or the head/visual-root
    ///   node is missing from the blueprint.
    /// - Anything [`RigBlueprint::instantiate`] reports.
    pub fn new(
        blueprint: &RigBlueprint,
        config: FrameLoopConfig,
        correction: CorrectionConfig,
        source: Box<dyn RedirectionSource>,
    ) -> Result<Self, WardenError> {
        correction.validate()?;
        for node in [&config.head_node, &config.visual_root_node] {
            if blueprint.spec(node).is_none() {
                return Err(WardenError::Config(format!("node {node} is not in the rig")));
            }
        }
        let (tree, registry) = blueprint.instantiate()?;
        if registry.is_governed(&config.visual_root_node) {
            return Err(WardenError::Config(format!(
                "visual root {} must not be governed",
                config.visual_root_node
            )));
        }

        info!(
            governed = registry.len(),
            head = %config.head_node,
            visual_root = %config.visual_root_node,
            "frame loop ready"
        );
        Ok(Self {
            detector: DriftDetector::new(correction.sanity_ceiling),
            corrector: Corrector::new(correction),
            reset: ResetCoordinator::new(config.reset_exempt.iter().cloned()),
            scanner: ConsistencyScanner::new(config.consistency_interval),
            rebaser: VisualRebaser::new(config.ground_height, config.heading_epsilon),
            bus: DiagnosticsBus::default(),
            log: DriftLog::new(config.log_capacity),
            blueprint: blueprint.clone(),
            tree,
            registry,
            source,
            config,
            frame: 0,
        })
    }

    /// Run one full pass.  `now` drives the consistency-scan throttle.
    #[instrument(name = "late_update", skip_all, fields(frame = tracing::field::Empty))]
    pub fn late_update(&mut self, now: Instant) -> FrameReport {
        self.frame += 1;
        let frame = self.frame;
        tracing::Span::current().record("frame", frame);
        let mut collaborator_errors = Vec::new();

        // 1. Reset gate.
        self.source.on_frame(frame);
        for signal in self.source.drain_reset_signals() {
            self.reset.handle(signal);
        }
        self.reset.reconcile(self.source.reset_in_progress());
        let phase = self.reset.phase();

        // 2–3. Detect and correct.
        let mut events = self
            .detector
            .scan(frame, &self.tree, &self.registry, &self.reset);
        let corrections =
            self.corrector
                .apply(&mut self.tree, &self.registry, &self.reset, &mut events);

        // 4. Report.
        for event in &events {
            match event.kind {
                DriftKind::Magnitude => {
                    debug!(node = %event.node, action = ?event.action, "magnitude drift")
                }
                _ => warn!(node = %event.node, kind = ?event.kind, action = ?event.action, "drift"),
            }
            self.log.record(event.clone());
            self.bus.publish(event.clone());
        }

        // 5. Throttled consistency scan.
        let mut head_divergence = None;
        let consistency = self
            .scanner
            .run_if_due(now, &mut self.tree, &self.registry);
        if consistency.is_some() {
            match self.source.head_pose() {
                Ok(theirs) => head_divergence = self.check_divergence(theirs),
                Err(e) => {
                    warn!(error = %e, "redirection collaborator failed");
                    collaborator_errors.push(e);
                }
            }
        }

        // 6. Rebase.
        let rebased = self.rebase(&events);

        FrameReport {
            frame,
            phase,
            events,
            corrections,
            consistency,
            head_divergence,
            rebased,
            collaborator_errors,
        }
    }

    fn check_divergence(&self, theirs: Pose) -> Option<f32> {
        let ours = self
            .tree
            .find(&self.config.head_node)
            .and_then(|id| self.tree.world_pose(id))
            .filter(|p| p.is_finite())?;
        let distance = ours.position.distance(theirs.position);
        if !distance.is_finite() {
            return None;
        }
        if distance > self.config.divergence_warning {
            warn!(
                distance,
                limit = self.config.divergence_warning,
                "tree head diverges from redirection head"
            );
        }
        Some(distance)
    }

    /// The head's world pose if it passed this frame's checks.
    fn validated_head(&self, events: &[DriftEvent]) -> Option<Pose> {
        let head = self.config.head_node.as_str();
        if self.detector.is_missing(head) {
            return None;
        }
        // A failed repair leaves the event pending.
        if events
            .iter()
            .any(|e| e.node == head && e.action == CorrectiveAction::Pending)
        {
            return None;
        }
        let id = self.tree.find(head)?;
        let node = self.tree.get(id)?;
        if !self.tree.is_active_in_hierarchy(id) || node.parent() != node.declared_parent() {
            return None;
        }
        self.tree.world_pose(id)
    }

    fn rebase(&mut self, events: &[DriftEvent]) -> bool {
        let head = self.validated_head(events);
        let Some(root) = self.visual_root() else {
            return false;
        };
        match self.rebaser.apply(&mut self.tree, root, head) {
            Ok(written) => written,
            Err(e) => {
                warn!(error = %e, "visual rebase failed; avatar left in place");
                false
            }
        }
    }

    fn visual_root(&self) -> Option<NodeId> {
        self.tree
            .find(&self.config.visual_root_node)
            .filter(|id| self.tree.is_active_in_hierarchy(*id))
    }

    /// Recreate a torn-down node (and its declared subtree) from the rig
    /// blueprint.
    pub fn respawn(&mut self, name: &str) -> Result<NodeId, WardenError> {
        self.blueprint.respawn(&mut self.tree, name)
    }

    // ── Accessors ──────────────────────────────────────────────────────────

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn phase(&self) -> ResetPhase {
        self.reset.phase()
    }

    pub fn reset(&self) -> &ResetCoordinator {
        &self.reset
    }

    pub fn tree(&self) -> &PoseTree {
        &self.tree
    }

    /// Host access to the tree: engine events, tracking writes, test
    /// disturbances.  Governed poses written here are policed next frame.
    pub fn tree_mut(&mut self) -> &mut PoseTree {
        &mut self.tree
    }

    pub fn registry(&self) -> &InvariantRegistry {
        &self.registry
    }

    pub fn corrector(&self) -> &Corrector {
        &self.corrector
    }

    pub fn log(&self) -> &DriftLog {
        &self.log
    }

    pub fn bus(&self) -> &DiagnosticsBus {
        &self.bus
    }

    /// Subscribe to every drift event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DriftEvent> {
        self.bus.subscribe()
    }

    pub fn rebaser(&self) -> &VisualRebaser {
        &self.rebaser
    }

    pub fn config(&self) -> &FrameLoopConfig {
        &self.config
    }
}
