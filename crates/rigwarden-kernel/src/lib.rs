//! `rigwarden-kernel` – Invariant enforcement
//!
//! The watchdog of the rig.  It does not move the avatar; it notices when the
//! pose tree has been broken and puts it back.
//!
//! # Modules
//!
//! - [`blueprint`] – [`RigBlueprint`][blueprint::RigBlueprint]: the static
//!   node table supplied at avatar construction.  Instantiates the
//!   [`PoseTree`][rigwarden_spatial::PoseTree] and the matching registry, and
//!   respawns torn-down nodes by name.
//! - [`invariant_registry`] – [`InvariantRegistry`][invariant_registry::InvariantRegistry]:
//!   immutable table of per-node canonical offsets, tolerance radii and
//!   recovery policies.
//! - [`drift_detector`] – [`DriftDetector`][drift_detector::DriftDetector]:
//!   per-frame, read-only scan producing
//!   [`DriftEvent`][rigwarden_types::DriftEvent]s in repair-priority order.
//! - [`corrector`] – [`Corrector`][corrector::Corrector]: the only writer of
//!   governed node poses.  Re-attaches, restores known-good poses, and snaps
//!   or smooths drift back to canonical.
//! - [`reset_coordinator`] – [`ResetCoordinator`][reset_coordinator::ResetCoordinator]:
//!   Idle/Resetting state machine deciding which magnitude checks apply.
//! - [`consistency_scan`] – [`ConsistencyScanner`][consistency_scan::ConsistencyScanner]:
//!   time-throttled full-tree audit for conditions too expensive to check
//!   every frame.

pub mod blueprint;
pub mod consistency_scan;
pub mod corrector;
pub mod drift_detector;
pub mod invariant_registry;
pub mod reset_coordinator;

pub use blueprint::{NodeSpec, RigBlueprint};
pub use consistency_scan::{ConsistencyReport, ConsistencyScanner};
pub use corrector::{CorrectionConfig, CorrectionSummary, Corrector};
pub use drift_detector::{DEFAULT_SANITY_CEILING, DriftDetector};
pub use invariant_registry::{Invariant, InvariantRegistry};
pub use reset_coordinator::{ResetCoordinator, ResetSignal};
