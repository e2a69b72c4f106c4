//! [`RigBlueprint`] – the node table supplied once at avatar construction.
//!
//! Each [`NodeSpec`] names a node, its declared parent, its canonical local
//! pose and, for governed nodes, the tolerance radius and recovery policy.
//! The blueprint is the single source for both the live
//! [`PoseTree`] and the [`InvariantRegistry`], so the two can never disagree
//! about a node's canonical pose.
//!
//! # Example
//!
//! ```rust
//! use rigwarden_kernel::blueprint::{NodeSpec, RigBlueprint};
//! use rigwarden_spatial::Vec3;
//! use rigwarden_types::RecoveryPolicy;
//!
//! let blueprint = RigBlueprint::new(vec![
//!     NodeSpec::ungoverned("rig", None, Vec3::zero()),
//!     NodeSpec::governed("head", Some("rig"), Vec3::new(0.0, 1.6, 0.0), 0.2, RecoveryPolicy::SmoothToCanonical),
//! ])
//! .unwrap();
//!
//! let (tree, registry) = blueprint.instantiate().unwrap();
//! assert_eq!(tree.len(), 2);
//! assert!(registry.is_governed("head"));
//! ```

use std::collections::HashSet;

use rigwarden_spatial::{NodeId, Pose, PoseTree, Quaternion, Vec3};
use rigwarden_types::{RecoveryPolicy, WardenError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::invariant_registry::{Invariant, InvariantRegistry};

// ────────────────────────────────────────────────────────────────────────────
// NodeSpec
// ────────────────────────────────────────────────────────────────────────────

/// One row of the node table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub name: String,
    /// Declared parent; `None` places the node at the root.
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default = "Vec3::zero")]
    pub canonical_position: Vec3,
    #[serde(default = "Quaternion::identity")]
    pub canonical_rotation: Quaternion,
    /// Tolerance radius in metres.  Must be positive for governed nodes.
    #[serde(default)]
    pub tolerance_radius: f32,
    #[serde(default)]
    pub recovery_policy: RecoveryPolicy,
    /// Whether the node is watched by the drift detector.
    #[serde(default = "default_governed")]
    pub governed: bool,
}

fn default_governed() -> bool {
    true
}

impl NodeSpec {
    /// A node the warden keeps at `canonical_position`.
    pub fn governed(
        name: &str,
        parent: Option<&str>,
        canonical_position: Vec3,
        tolerance_radius: f32,
        recovery_policy: RecoveryPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            canonical_position,
            canonical_rotation: Quaternion::identity(),
            tolerance_radius,
            recovery_policy,
            governed: true,
        }
    }

    /// A structural node the warden never corrects.
    pub fn ungoverned(name: &str, parent: Option<&str>, canonical_position: Vec3) -> Self {
        Self {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            canonical_position,
            canonical_rotation: Quaternion::identity(),
            tolerance_radius: 0.0,
            recovery_policy: RecoveryPolicy::default(),
            governed: false,
        }
    }

    pub fn canonical_pose(&self) -> Pose {
        Pose::new(self.canonical_position, self.canonical_rotation)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RigBlueprint
// ────────────────────────────────────────────────────────────────────────────

/// Validated node table.
#[derive(Debug, Clone, PartialEq)]
pub struct RigBlueprint {
    specs: Vec<NodeSpec>,
}

impl RigBlueprint {
    /// Validate and wrap a node table.
    ///
    /// # Errors
    ///
    /// [`WardenError::Config`] when names repeat, a parent is not declared
    /// before its child, or a governed node's tolerance/canonical pose is
    /// unusable.
    pub fn new(specs: Vec<NodeSpec>) -> Result<Self, WardenError> {
        let mut seen = HashSet::new();
        for spec in &specs {
            if let Some(parent) = &spec.parent
                && !seen.contains(parent.as_str())
            {
                return Err(WardenError::Config(format!(
                    "parent {parent} of {} must be declared before it",
                    spec.name
                )));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(WardenError::Config(format!(
                    "node {} declared twice",
                    spec.name
                )));
            }
        }
        let blueprint = Self { specs };
        // Surface invariant problems at construction time.
        blueprint.registry()?;
        Ok(blueprint)
    }

    /// The default humanoid rig: a redirected tracking space carrying the
    /// camera offset and head, plus a free-standing avatar visual root with
    /// its body chain.
    pub fn humanoid() -> Self {
        use RecoveryPolicy::{SmoothToCanonical, SnapToCanonical};
        Self {
            specs: vec![
                NodeSpec::ungoverned("tracking_space", None, Vec3::zero()),
                NodeSpec::governed(
                    "camera_offset",
                    Some("tracking_space"),
                    Vec3::zero(),
                    0.01,
                    SnapToCanonical,
                ),
                NodeSpec::governed(
                    "head",
                    Some("camera_offset"),
                    Vec3::new(0.0, 1.6, 0.0),
                    0.2,
                    SmoothToCanonical,
                ),
                NodeSpec::ungoverned("avatar_visual_root", None, Vec3::zero()),
                NodeSpec::governed(
                    "avatar_hips",
                    Some("avatar_visual_root"),
                    Vec3::new(0.0, 1.0, 0.0),
                    0.1,
                    SmoothToCanonical,
                ),
                NodeSpec::governed(
                    "avatar_chest",
                    Some("avatar_hips"),
                    Vec3::new(0.0, 0.35, 0.0),
                    0.1,
                    SmoothToCanonical,
                ),
                NodeSpec::governed(
                    "avatar_head_anchor",
                    Some("avatar_chest"),
                    Vec3::new(0.0, 0.25, 0.0),
                    0.05,
                    SnapToCanonical,
                ),
            ],
        }
    }

    pub fn specs(&self) -> &[NodeSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&NodeSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    /// Build the [`InvariantRegistry`] for the governed rows.
    pub fn registry(&self) -> Result<InvariantRegistry, WardenError> {
        InvariantRegistry::new(
            self.specs
                .iter()
                .filter(|s| s.governed)
                .map(|s| Invariant {
                    target_node: s.name.clone(),
                    declared_parent: s.parent.clone(),
                    canonical_local_pose: s.canonical_pose(),
                    max_allowed_local_displacement: s.tolerance_radius,
                    recovery_policy: s.recovery_policy,
                })
                .collect(),
        )
    }

    /// Spawn every node into a fresh tree and build the matching registry.
    pub fn instantiate(&self) -> Result<(PoseTree, InvariantRegistry), WardenError> {
        let registry = self.registry()?;
        let mut tree = PoseTree::new();
        for spec in &self.specs {
            self.spawn_one(&mut tree, spec)?;
        }
        info!(nodes = tree.len(), governed = registry.len(), "rig instantiated");
        Ok((tree, registry))
    }

    /// Recreate `name` and any of its declared descendants that are not
    /// alive, e.g. after a scene reload tore them down.  Returns the handle
    /// of `name`.
    ///
    /// # Errors
    ///
    /// - [`WardenError::UnknownNode`] – `name` is not in the blueprint.
    /// - [`WardenError::MissingNode`] – the declared parent is not alive.
    /// - [`WardenError::Hierarchy`] – `name` is already alive.
    pub fn respawn(&self, tree: &mut PoseTree, name: &str) -> Result<NodeId, WardenError> {
        let spec = self
            .spec(name)
            .ok_or_else(|| WardenError::UnknownNode(name.to_string()))?;
        let id = self.spawn_one(tree, spec)?;

        let mut subtree: HashSet<&str> = HashSet::from([name]);
        for child in &self.specs {
            let Some(parent) = child.parent.as_deref() else {
                continue;
            };
            if subtree.contains(parent) {
                subtree.insert(child.name.as_str());
                if tree.find(&child.name).is_none() {
                    self.spawn_one(tree, child)?;
                }
            }
        }
        info!(node = name, "respawned from blueprint");
        Ok(id)
    }

    fn spawn_one(&self, tree: &mut PoseTree, spec: &NodeSpec) -> Result<NodeId, WardenError> {
        let parent = match &spec.parent {
            Some(p) => Some(
                tree.find(p)
                    .ok_or_else(|| WardenError::MissingNode(p.clone()))?,
            ),
            None => None,
        };
        tree.spawn(&spec.name, parent, spec.canonical_pose(), spec.tolerance_radius)
    }
}
