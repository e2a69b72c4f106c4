use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// How a governed node is brought back to its canonical local pose once it
/// has drifted past its tolerance radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryPolicy {
    /// Always jump straight back to the canonical pose.
    SnapToCanonical,
    /// Converge over a few frames while the drift is small; snap when it is
    /// gross.
    #[default]
    SmoothToCanonical,
}

/// Phase of the externally driven reset cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResetPhase {
    #[default]
    Idle,
    Resetting,
}

/// Category of a detected violation, in descending repair priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// The node is attached to something other than its declared parent.
    Ownership,
    /// The node's pose holds a non-finite or absurdly large value.
    Invalid,
    /// The node drifted further than its tolerance radius.
    Magnitude,
    /// The node (or its declared parent) is destroyed or disabled.
    Missing,
}

/// What the corrector did about a [`DriftEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrectiveAction {
    /// Detected but not yet handled.
    Pending,
    /// Re-attached to the declared parent and reset to canonical.
    Reparented,
    /// Replaced a bad pose with the last known-good local pose.
    RestoredKnownGood,
    /// Replaced a bad pose with the canonical pose (no known-good pose yet).
    RestoredCanonical,
    /// Jumped straight to the canonical pose.
    Snapped,
    /// Took one convergence step; `remaining` is the distance still left.
    Smoothing { remaining: f32 },
    /// Checks for the node are suspended until it reappears.
    ChecksSuspended,
}

/// One detected violation and the repair applied to it.
///
/// Produced by the drift detector, completed by the corrector and published
/// to the diagnostics stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Frame counter of the pass that produced the event.
    pub frame: u64,
    pub node: String,
    pub kind: DriftKind,
    /// Distance between the observed and canonical local position, when it
    /// could be measured.
    pub observed_displacement: Option<f32>,
    /// Tolerance radius of the node at the time of the scan.
    pub tolerance_radius: f32,
    pub action: CorrectiveAction,
}

impl DriftEvent {
    /// Build a pending event for `node`.
    pub fn new(
        frame: u64,
        node: impl Into<String>,
        kind: DriftKind,
        observed_displacement: Option<f32>,
        tolerance_radius: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            frame,
            node: node.into(),
            kind,
            observed_displacement,
            tolerance_radius,
            action: CorrectiveAction::Pending,
        }
    }

    /// Equivalent [`WardenError`] for callers that want to surface the
    /// violation through a `Result`.
    pub fn to_error(&self) -> WardenError {
        match self.kind {
            DriftKind::Ownership => WardenError::OwnershipViolation {
                node: self.node.clone(),
            },
            DriftKind::Invalid => WardenError::InvalidPose {
                node: self.node.clone(),
                details: match self.observed_displacement {
                    Some(d) => format!("displacement {d}"),
                    None => "non-finite component".to_string(),
                },
            },
            DriftKind::Magnitude => WardenError::MagnitudeViolation {
                node: self.node.clone(),
                displacement: self.observed_displacement.unwrap_or(f32::NAN),
                tolerance: self.tolerance_radius,
            },
            DriftKind::Missing => WardenError::MissingNode(self.node.clone()),
        }
    }
}

/// Global error type for the rig warden.
///
/// The first four variants mirror [`DriftKind`] and are always recovered
/// locally; the remainder report misuse of the API, bad configuration or a
/// failing collaborator.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WardenError {
    #[error("Ownership violation on {node}")]
    OwnershipViolation { node: String },

    #[error("Magnitude violation on {node}: displacement {displacement} exceeds {tolerance}")]
    MagnitudeViolation {
        node: String,
        displacement: f32,
        tolerance: f32,
    },

    #[error("Invalid pose on {node}: {details}")]
    InvalidPose { node: String, details: String },

    #[error("Missing node: {0}")]
    MissingNode(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redirection collaborator error: {0}")]
    Redirection(String),
}
