//! [`InvariantRegistry`] – the static rule table.
//!
//! One [`Invariant`] per governed node, declared once when the avatar is
//! built and never changed afterwards.  Lookup is by node name; iteration
//! follows declaration order so scans are deterministic.

use std::collections::HashMap;

use rigwarden_spatial::Pose;
use rigwarden_types::{RecoveryPolicy, WardenError};

// ────────────────────────────────────────────────────────────────────────────
// Invariant
// ────────────────────────────────────────────────────────────────────────────

/// The designed-correct placement of one node and how far it may stray.
#[derive(Debug, Clone, PartialEq)]
pub struct Invariant {
    /// Name of the governed node.
    pub target_node: String,
    /// Name of the parent the node was declared under, `None` for roots.
    pub declared_parent: Option<String>,
    /// Canonical pose relative to the declared parent.
    pub canonical_local_pose: Pose,
    /// Tolerance radius (metres) around the canonical position.
    pub max_allowed_local_displacement: f32,
    pub recovery_policy: RecoveryPolicy,
}

// ────────────────────────────────────────────────────────────────────────────
// InvariantRegistry
// ────────────────────────────────────────────────────────────────────────────

/// Immutable table of [`Invariant`]s keyed by node name.
#[derive(Debug, Clone, Default)]
pub struct InvariantRegistry {
    invariants: Vec<Invariant>,
    index: HashMap<String, usize>,
}

impl InvariantRegistry {
    /// Build the registry, validating every entry.
    ///
    /// # Errors
    ///
    /// [`WardenError::Config`] when a node is governed twice, a tolerance is
    /// not a positive finite number, or a canonical pose is non-finite.
    pub fn new(invariants: Vec<Invariant>) -> Result<Self, WardenError> {
        let mut index = HashMap::with_capacity(invariants.len());
        for (i, inv) in invariants.iter().enumerate() {
            let tol = inv.max_allowed_local_displacement;
            if !tol.is_finite() || tol <= 0.0 {
                return Err(WardenError::Config(format!(
                    "tolerance for {} must be positive and finite, got {tol}",
                    inv.target_node
                )));
            }
            if !inv.canonical_local_pose.is_finite() {
                return Err(WardenError::Config(format!(
                    "canonical pose for {} is non-finite",
                    inv.target_node
                )));
            }
            if index.insert(inv.target_node.clone(), i).is_some() {
                return Err(WardenError::Config(format!(
                    "node {} is governed twice",
                    inv.target_node
                )));
            }
        }
        Ok(Self { invariants, index })
    }

    pub fn get(&self, node: &str) -> Option<&Invariant> {
        self.index.get(node).map(|i| &self.invariants[*i])
    }

    pub fn is_governed(&self, node: &str) -> bool {
        self.index.contains_key(node)
    }

    /// Invariants in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Invariant> {
        self.invariants.iter()
    }

    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
