//! `rigwarden-middleware` – Diagnostics plumbing
//!
//! Carries [`DriftEvent`][rigwarden_types::DriftEvent]s away from the frame
//! loop without caring what they mean.
//!
//! # Modules
//!
//! - [`bus`] – [`DiagnosticsBus`]: ordered broadcast stream of drift events
//!   built on Tokio broadcast channels.
//! - [`drift_log`] – [`DriftLog`]: bounded in-memory retention of the most
//!   recent events.

pub mod bus;
pub mod drift_log;

pub use bus::{DiagnosticsBus, KindSubscriber};
pub use drift_log::DriftLog;
