//! The redirection collaborator seam.
//!
//! The redirection algorithm itself lives outside the warden.  The frame
//! loop only needs three things from it, expressed by [`RedirectionSource`]:
//! where it believes the head is, whether a reset is running, and the
//! reset begin/end notifications since the last frame.  The handle is
//! supplied once, at [`FrameLoop`][crate::FrameLoop] construction.
//!
//! [`SimRedirection`] is a scripted implementation for tests and the CLI
//! replay.
//!
//! # Example
//!
//! ```rust
//! use rigwarden_runtime::redirection::{RedirectionSource, SimRedirection};
//! use rigwarden_kernel::ResetSignal;
//!
//! let mut sim = SimRedirection::builder()
//!     .with_reset_window(3, 5)
//!     .build();
//!
//! sim.on_frame(3);
//! assert!(sim.reset_in_progress());
//! assert_eq!(sim.drain_reset_signals(), vec![ResetSignal::Begin]);
//!
//! sim.on_frame(5);
//! assert!(!sim.reset_in_progress());
//! assert_eq!(sim.drain_reset_signals(), vec![ResetSignal::End]);
//! ```

use std::collections::HashSet;

use rigwarden_kernel::ResetSignal;
use rigwarden_spatial::{Pose, Quaternion, Vec3};
use rigwarden_types::WardenError;

/// What the frame loop consumes from the redirection collaborator.
pub trait RedirectionSource: Send {
    /// Called once at the start of every frame, before any other method.
    fn on_frame(&mut self, _frame: u64) {}

    /// The collaborator's view of the head's world pose.
    ///
    /// # Errors
    ///
    /// [`WardenError::Redirection`] when the collaborator cannot answer this
    /// frame.
    fn head_pose(&self) -> Result<Pose, WardenError>;

    /// `true` while a reset is running.  Reconciled against the signals every
    /// frame.
    fn reset_in_progress(&self) -> bool;

    /// Reset begin/end notifications raised since the previous call, oldest
    /// first.
    fn drain_reset_signals(&mut self) -> Vec<ResetSignal>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SimRedirection
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted collaborator: a head walking at constant velocity and turn rate,
/// reset windows `[start, end)` in frames, and frames on which the head query
/// fails.
#[derive(Debug, Clone)]
pub struct SimRedirection {
    head: Pose,
    velocity: Vec3,
    yaw_rate: f32,
    reset_windows: Vec<(u64, u64)>,
    failing_frames: HashSet<u64>,
    silent: bool,
    frame: u64,
    in_progress: bool,
    pending: Vec<ResetSignal>,
}

impl SimRedirection {
    pub fn builder() -> SimRedirectionBuilder {
        SimRedirectionBuilder::default()
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn in_window(&self, frame: u64) -> bool {
        self.reset_windows
            .iter()
            .any(|(start, end)| (*start..*end).contains(&frame))
    }
}

impl Default for SimRedirection {
    fn default() -> Self {
        SimRedirectionBuilder::default().build()
    }
}

impl RedirectionSource for SimRedirection {
    fn on_frame(&mut self, frame: u64) {
        self.frame = frame;
        let now = self.in_window(frame);
        if now != self.in_progress {
            self.in_progress = now;
            if !self.silent {
                self.pending
                    .push(if now { ResetSignal::Begin } else { ResetSignal::End });
            }
        }
    }

    fn head_pose(&self) -> Result<Pose, WardenError> {
        if self.failing_frames.contains(&self.frame) {
            return Err(WardenError::Redirection(format!(
                "head pose unavailable at frame {}",
                self.frame
            )));
        }
        let t = self.frame as f32;
        Ok(Pose::new(
            self.head.position.add(self.velocity.scale(t)),
            Quaternion::from_yaw(self.yaw_rate * t).mul(self.head.rotation),
        ))
    }

    fn reset_in_progress(&self) -> bool {
        self.in_progress
    }

    fn drain_reset_signals(&mut self) -> Vec<ResetSignal> {
        std::mem::take(&mut self.pending)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Fluent builder for [`SimRedirection`].
pub struct SimRedirectionBuilder {
    head: Pose,
    velocity: Vec3,
    yaw_rate: f32,
    reset_windows: Vec<(u64, u64)>,
    failing_frames: HashSet<u64>,
    silent: bool,
}

impl Default for SimRedirectionBuilder {
    fn default() -> Self {
        Self {
            head: Pose::new(Vec3::new(0.0, 1.6, 0.0), Quaternion::identity()),
            velocity: Vec3::zero(),
            yaw_rate: 0.0,
            reset_windows: Vec::new(),
            failing_frames: HashSet::new(),
            silent: false,
        }
    }
}

impl SimRedirectionBuilder {
    /// Head world pose at frame 0.
    pub fn with_head_pose(mut self, pose: Pose) -> Self {
        self.head = pose;
        self
    }

    /// Per-frame head translation and yaw (radians).
    pub fn with_head_motion(mut self, velocity: Vec3, yaw_rate: f32) -> Self {
        self.velocity = velocity;
        self.yaw_rate = yaw_rate;
        self
    }

    /// A reset running on frames `start..end`.
    pub fn with_reset_window(mut self, start: u64, end: u64) -> Self {
        self.reset_windows.push((start, end));
        self
    }

    /// Make [`RedirectionSource::head_pose`] fail on `frame`.
    pub fn with_failure_at(mut self, frame: u64) -> Self {
        self.failing_frames.insert(frame);
        self
    }

    /// Raise no begin/end signals; only the in-progress flag changes.
    pub fn with_silent_resets(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn build(self) -> SimRedirection {
        SimRedirection {
            head: self.head,
            velocity: self.velocity,
            yaw_rate: self.yaw_rate,
            reset_windows: self.reset_windows,
            failing_frames: self.failing_frames,
            silent: self.silent,
            frame: 0,
            in_progress: false,
            pending: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signals_follow_reset_windows() {
        let mut sim = SimRedirection::builder()
            .with_reset_window(2, 4)
            .with_reset_window(6, 7)
            .build();
        let mut seen = Vec::new();
        for frame in 1..=8 {
            sim.on_frame(frame);
            seen.extend(sim.drain_reset_signals().into_iter().map(|s| (frame, s)));
        }
        assert_eq!(
            seen,
            vec![
                (2, ResetSignal::Begin),
                (4, ResetSignal::End),
                (6, ResetSignal::Begin),
                (7, ResetSignal::End),
            ]
        );
    }

    #[test]
    fn silent_resets_only_flip_the_flag() {
        let mut sim = SimRedirection::builder()
            .with_reset_window(1, 3)
            .with_silent_resets()
            .build();
        sim.on_frame(1);
        assert!(sim.reset_in_progress());
        assert!(sim.drain_reset_signals().is_empty());
    }

    #[test]
    fn head_moves_with_scripted_motion() {
        let mut sim = SimRedirection::builder()
            .with_head_motion(Vec3::new(0.1, 0.0, 0.0), 0.0)
            .build();
        sim.on_frame(10);
        let pose = sim.head_pose().unwrap();
        assert!((pose.position.x - 1.0).abs() < 1e-5);
        assert!((pose.position.y - 1.6).abs() < 1e-5);
    }

    #[test]
    fn scripted_failure_surfaces_as_redirection_error() {
        let mut sim = SimRedirection::builder().with_failure_at(4).build();
        sim.on_frame(4);
        assert!(matches!(sim.head_pose(), Err(WardenError::Redirection(_))));
        sim.on_frame(5);
        assert!(sim.head_pose().is_ok());
    }
}
