//! `rigwarden-runtime` – Frame orchestration
//!
//! Wires the kernel components, the diagnostics plumbing and the external
//! redirection collaborator into a single per-frame pass.
//!
//! # Modules
//!
//! - [`frame_loop`] – [`FrameLoop`][frame_loop::FrameLoop]: owns the pose
//!   tree and runs reset gating, detection, correction, reporting, the
//!   throttled consistency scan and visual rebasing, in that order, once per
//!   [`late_update`][frame_loop::FrameLoop::late_update].
//! - [`redirection`] – [`RedirectionSource`][redirection::RedirectionSource]:
//!   the extension point through which the redirection collaborator is
//!   consumed, plus the scripted [`SimRedirection`][redirection::SimRedirection].
//! - [`visual_rebaser`] – [`VisualRebaser`][visual_rebaser::VisualRebaser]:
//!   derives the avatar placement from the validated head pose.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.

pub mod frame_loop;
pub mod redirection;
pub mod telemetry;
pub mod visual_rebaser;

pub use frame_loop::{FrameLoop, FrameLoopConfig, FrameReport};
pub use redirection::{RedirectionSource, SimRedirection, SimRedirectionBuilder};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use visual_rebaser::VisualRebaser;
