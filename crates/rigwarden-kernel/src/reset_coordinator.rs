//! [`ResetCoordinator`] – gates magnitude checks around redirection resets.
//!
//! A reset is an intentional, large reorientation of the user's heading.
//! While it runs, the nodes that legitimately jump (by default the head and
//! the avatar visual root) would trip every magnitude check, so those checks
//! are suspended for them.  Ownership and invalid-pose checks always apply:
//! they never describe legitimate motion.
//!
//! ```text
//!          begin                end
//!   Idle ─────────▶ Resetting ─────────▶ Idle ...
//! ```
//!
//! There is no terminal state; the cycle repeats for the whole session.
//!
//! # Example
//!
//! ```rust
//! use rigwarden_kernel::reset_coordinator::ResetCoordinator;
//! use rigwarden_types::{DriftKind, ResetPhase};
//!
//! let mut reset = ResetCoordinator::new(["head"]);
//! assert!(reset.permits("head", DriftKind::Magnitude));
//!
//! reset.begin_reset();
//! assert_eq!(reset.phase(), ResetPhase::Resetting);
//! assert!(!reset.permits("head", DriftKind::Magnitude));
//! assert!(reset.permits("head", DriftKind::Ownership));
//!
//! reset.end_reset();
//! assert!(reset.permits("head", DriftKind::Magnitude));
//! ```

use std::collections::HashSet;

use rigwarden_types::{DriftKind, ResetPhase};
use tracing::{debug, info, warn};

/// External reset notification from the redirection collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetSignal {
    Begin,
    End,
}

/// Idle/Resetting state machine.
#[derive(Debug, Clone)]
pub struct ResetCoordinator {
    phase: ResetPhase,
    /// Nodes whose magnitude checks are suspended while resetting.
    exempt: HashSet<String>,
    completed_resets: u64,
}

impl ResetCoordinator {
    /// Create a coordinator in [`ResetPhase::Idle`] with the given
    /// reset-exempt node names.
    pub fn new<I, S>(exempt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            phase: ResetPhase::Idle,
            exempt: exempt.into_iter().map(Into::into).collect(),
            completed_resets: 0,
        }
    }

    pub fn phase(&self) -> ResetPhase {
        self.phase
    }

    pub fn is_resetting(&self) -> bool {
        self.phase == ResetPhase::Resetting
    }

    /// Number of Resetting → Idle transitions so far.
    pub fn completed_resets(&self) -> u64 {
        self.completed_resets
    }

    /// Enter [`ResetPhase::Resetting`].  Returns `false` (and changes
    /// nothing) when a reset is already running.
    pub fn begin_reset(&mut self) -> bool {
        if self.phase == ResetPhase::Resetting {
            debug!("reset-begin ignored: already resetting");
            return false;
        }
        self.phase = ResetPhase::Resetting;
        info!(exempt = ?self.exempt, "reset started; magnitude checks suspended for exempt nodes");
        true
    }

    /// Return to [`ResetPhase::Idle`].  Returns `false` when no reset was
    /// running.
    pub fn end_reset(&mut self) -> bool {
        if self.phase == ResetPhase::Idle {
            debug!("reset-end ignored: not resetting");
            return false;
        }
        self.phase = ResetPhase::Idle;
        self.completed_resets += 1;
        info!(completed = self.completed_resets, "reset finished; all checks active");
        true
    }

    /// Apply a collaborator signal.  Returns `true` if the phase changed.
    pub fn handle(&mut self, signal: ResetSignal) -> bool {
        match signal {
            ResetSignal::Begin => self.begin_reset(),
            ResetSignal::End => self.end_reset(),
        }
    }

    /// Align the phase with the collaborator's reset-in-progress flag.
    ///
    /// Signals can be lost (a callback registered late, a scene reload
    /// between begin and end); the flag is the ground truth.  Returns `true`
    /// if the phase had to be corrected.
    pub fn reconcile(&mut self, in_progress: bool) -> bool {
        let resetting = self.is_resetting();
        if in_progress == resetting {
            return false;
        }
        warn!(
            in_progress,
            phase = ?self.phase,
            "reset flag disagrees with phase; a reset signal was missed"
        );
        if in_progress {
            self.begin_reset()
        } else {
            self.end_reset()
        }
    }

    /// `true` when `node` is exempt from magnitude checks during resets.
    pub fn is_exempt(&self, node: &str) -> bool {
        self.exempt.contains(node)
    }

    /// Whether a check of `kind` applies to `node` in the current phase.
    pub fn permits(&self, node: &str, kind: DriftKind) -> bool {
        match kind {
            DriftKind::Magnitude => !(self.is_resetting() && self.is_exempt(node)),
            DriftKind::Ownership | DriftKind::Invalid | DriftKind::Missing => true,
        }
    }
}

impl Default for ResetCoordinator {
    fn default() -> Self {
        Self::new(["head", "avatar_visual_root"])
    }
}
