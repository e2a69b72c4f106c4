//! [`PoseTree`] – arena of named pose nodes and their ownership.
//!
//! Every node remembers two parents: the *declared* parent it was spawned
//! under (or explicitly moved to with [`PoseTree::reparent`]) and the
//! *actual* parent it is currently attached to.  Engine-level events such as
//! [`PoseTree::attach`] only move the actual parent, which is exactly the
//! kind of silent breakage the drift detector looks for.
//!
//! Nodes are addressed by generational [`NodeId`] handles.  Tearing a node
//! down bumps its slot generation, so a handle held across a despawn can be
//! recognised as stale instead of aliasing whatever is spawned next.
//!
//! # Example
//!
//! ```rust
//! use rigwarden_spatial::pose_tree::PoseTree;
//! use rigwarden_spatial::transform::{Pose, Quaternion, Vec3};
//!
//! let mut tree = PoseTree::new();
//! let rig = tree.spawn("rig", None, Pose::identity(), 0.0).unwrap();
//! let head = tree
//!     .spawn("head", Some(rig), Pose::new(Vec3::new(0.0, 1.6, 0.0), Quaternion::identity()), 0.05)
//!     .unwrap();
//!
//! let world = tree.world_pose(head).unwrap();
//! assert!((world.position.y - 1.6).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet};

use rigwarden_types::WardenError;
use tracing::debug;

use crate::transform::{Pose, Quaternion, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Handles
// ────────────────────────────────────────────────────────────────────────────

/// Generational handle to a node in a [`PoseTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

// ────────────────────────────────────────────────────────────────────────────
// PoseNode
// ────────────────────────────────────────────────────────────────────────────

/// A single named node of the avatar/tracking hierarchy.
///
/// The canonical local pose and tolerance radius are fixed at spawn time;
/// only the live local pose changes afterwards.
#[derive(Debug, Clone)]
pub struct PoseNode {
    name: String,
    parent: Option<NodeId>,
    declared_parent: Option<NodeId>,
    children: Vec<NodeId>,
    local_position: Vec3,
    local_rotation: Quaternion,
    canonical: Pose,
    tolerance_radius: f32,
    active: bool,
}

impl PoseNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The parent the node is currently attached to.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// The parent the node is supposed to be attached to.
    pub fn declared_parent(&self) -> Option<NodeId> {
        self.declared_parent
    }

    /// Children in attachment order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn local_position(&self) -> Vec3 {
        self.local_position
    }

    pub fn local_rotation(&self) -> Quaternion {
        self.local_rotation
    }

    pub fn local_pose(&self) -> Pose {
        Pose::new(self.local_position, self.local_rotation)
    }

    pub fn canonical_local_pose(&self) -> Pose {
        self.canonical
    }

    pub fn tolerance_radius(&self) -> f32 {
        self.tolerance_radius
    }

    /// The node's own enabled flag.  See
    /// [`PoseTree::is_active_in_hierarchy`] for the effective state.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Distance between the live and canonical local position.
    pub fn displacement(&self) -> f32 {
        self.local_position.distance(self.canonical.position)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Audit
// ────────────────────────────────────────────────────────────────────────────

/// Structural inconsistencies found by [`PoseTree::audit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeAudit {
    /// Child-list entries pointing at destroyed nodes.
    pub dangling_child_links: usize,
    /// Nodes whose parent does not list them, or lists that name a node
    /// whose parent is someone else.
    pub parent_child_mismatches: usize,
    /// Name-index entries pointing at destroyed nodes.
    pub stale_name_entries: usize,
}

impl TreeAudit {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PoseTree
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    node: Option<PoseNode>,
}

/// Arena-backed hierarchy of [`PoseNode`]s addressed by [`NodeId`].
#[derive(Debug, Default)]
pub struct PoseTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    names: HashMap<String, NodeId>,
}

impl PoseTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Spawn a node under `parent` with its canonical local pose.
    ///
    /// The node starts at its canonical pose and `parent` becomes both its
    /// actual and declared parent.
    ///
    /// # Errors
    ///
    /// - [`WardenError::Hierarchy`] – the name is taken or `parent` is stale.
    /// - [`WardenError::InvalidPose`] – the canonical pose is non-finite.
    pub fn spawn(
        &mut self,
        name: &str,
        parent: Option<NodeId>,
        canonical: Pose,
        tolerance_radius: f32,
    ) -> Result<NodeId, WardenError> {
        if self.names.contains_key(name) {
            return Err(WardenError::Hierarchy(format!("node {name} already exists")));
        }
        if let Some(p) = parent {
            self.require(p)?;
        }
        if !canonical.is_finite() {
            return Err(WardenError::InvalidPose {
                node: name.to_string(),
                details: "canonical pose is non-finite".to_string(),
            });
        }

        let node = PoseNode {
            name: name.to_string(),
            parent,
            declared_parent: parent,
            children: Vec::new(),
            local_position: canonical.position,
            local_rotation: canonical.rotation,
            canonical,
            tolerance_radius,
            active: true,
        };

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        };

        if let Some(p) = parent {
            self.node_mut(p)?.children.push(id);
        }
        self.names.insert(name.to_string(), id);
        debug!(node = name, "spawned pose node");
        Ok(id)
    }

    /// Destroy `id` and its whole subtree.  Returns the names removed, the
    /// root of the subtree first.
    pub fn despawn(&mut self, id: NodeId) -> Result<Vec<String>, WardenError> {
        let parent = self.require(id)?.parent;
        if let Some(p) = parent.filter(|p| self.contains(*p)) {
            self.node_mut(p)?.children.retain(|c| *c != id);
        }

        let mut removed = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let slot = &mut self.slots[current.index as usize];
            if slot.generation != current.generation {
                continue;
            }
            if let Some(node) = slot.node.take() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(current.index);
                self.names.remove(&node.name);
                stack.extend(node.children.iter().copied());
                removed.push(node.name);
            }
        }
        debug!(nodes = ?removed, "despawned pose subtree");
        Ok(removed)
    }

    /// `true` when `id` refers to a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Option<&PoseNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    /// Look a live node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.names.get(name).copied().filter(|id| self.contains(*id))
    }

    /// Name of a live node.
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.get(id).map(PoseNode::name)
    }

    /// Iterate over every live node.  Order is unspecified.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &PoseNode)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.node.as_ref().map(|node| {
                (
                    NodeId {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    node,
                )
            })
        })
    }

    /// `true` when the node and every ancestor are enabled.
    pub fn is_active_in_hierarchy(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        let mut steps = 0;
        while let Some(c) = current {
            match self.get(c) {
                Some(node) if node.active => current = node.parent,
                _ => return false,
            }
            steps += 1;
            if steps > self.slots.len() {
                return false;
            }
        }
        true
    }

    // ── Engine-level primitives ────────────────────────────────────────────

    /// Attach `id` to `parent` the way the host engine would.
    ///
    /// Only the actual parent changes; the declared parent and the local
    /// pose stay as they were.  Use [`PoseTree::reparent`] for intended
    /// moves.
    ///
    /// # Errors
    ///
    /// [`WardenError::Hierarchy`] for stale handles, self-attachment or an
    /// attachment that would create a cycle.
    pub fn attach(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), WardenError> {
        let old_parent = self.require(id)?.parent;
        if let Some(p) = parent {
            self.require(p)?;
            if self.is_ancestor_or_self(id, p) {
                return Err(WardenError::Hierarchy(format!(
                    "attaching {} under {} would create a cycle",
                    self.label(id),
                    self.label(p)
                )));
            }
        }
        if old_parent == parent {
            return Ok(());
        }

        if let Some(old) = old_parent.filter(|p| self.contains(*p)) {
            self.node_mut(old)?.children.retain(|c| *c != id);
        }
        if let Some(p) = parent {
            self.node_mut(p)?.children.push(id);
        }
        self.node_mut(id)?.parent = parent;
        Ok(())
    }

    /// Explicitly move `id` under `parent`, updating its declared parent.
    pub fn reparent(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<(), WardenError> {
        self.attach(id, parent)?;
        self.node_mut(id)?.declared_parent = parent;
        Ok(())
    }

    /// Enable or disable a node (and, effectively, its subtree).
    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<(), WardenError> {
        self.node_mut(id)?.active = active;
        Ok(())
    }

    // ── Pose access ────────────────────────────────────────────────────────

    pub fn local_pose(&self, id: NodeId) -> Option<Pose> {
        self.get(id).map(PoseNode::local_pose)
    }

    /// Overwrite the live local pose of `id`.  No validation: a host can
    /// write anything here, including non-finite values.
    pub fn set_local_pose(&mut self, id: NodeId, pose: Pose) -> Result<(), WardenError> {
        let node = self.node_mut(id)?;
        node.local_position = pose.position;
        node.local_rotation = pose.rotation;
        Ok(())
    }

    pub fn set_local_position(&mut self, id: NodeId, position: Vec3) -> Result<(), WardenError> {
        self.node_mut(id)?.local_position = position;
        Ok(())
    }

    /// Pose of `id` in world space, composed through its actual parents.
    pub fn world_pose(&self, id: NodeId) -> Option<Pose> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.get(c)?;
            chain.push(node.local_pose());
            if chain.len() > self.slots.len() {
                return None;
            }
            current = node.parent;
        }
        Some(
            chain
                .into_iter()
                .rev()
                .fold(Pose::identity(), |acc, local| acc.compose(local)),
        )
    }

    /// Set the local pose of `id` so that its world pose becomes `world`.
    pub fn set_world_pose(&mut self, id: NodeId, world: Pose) -> Result<(), WardenError> {
        let parent = self.require(id)?.parent;
        let parent_world = match parent {
            Some(p) => self
                .world_pose(p)
                .ok_or_else(|| WardenError::MissingNode(self.label(p)))?,
            None => Pose::identity(),
        };
        self.set_local_pose(id, parent_world.inverse().compose(world))
    }

    // ── Consistency ────────────────────────────────────────────────────────

    /// Count structural inconsistencies without changing anything.
    pub fn audit(&self) -> TreeAudit {
        let mut audit = TreeAudit::default();
        for (id, node) in self.iter() {
            for child in &node.children {
                match self.get(*child) {
                    None => audit.dangling_child_links += 1,
                    Some(c) if c.parent != Some(id) => audit.parent_child_mismatches += 1,
                    Some(_) => {}
                }
            }
            if let Some(p) = node.parent {
                match self.get(p) {
                    Some(parent) if !parent.children.contains(&id) => {
                        audit.parent_child_mismatches += 1
                    }
                    _ => {}
                }
            }
        }
        audit.stale_name_entries = self
            .names
            .values()
            .filter(|id| !self.contains(**id))
            .count();
        audit
    }

    /// Repair what [`PoseTree::audit`] reports: drop dangling and mismatched
    /// child links, relink children their parent forgot, and prune stale
    /// name entries.  Actual parent references are treated as authoritative.
    /// Returns the number of fixes applied.
    pub fn repair_links(&mut self) -> usize {
        let mut fixes = 0;

        let live: Vec<NodeId> = self.iter().map(|(id, _)| id).collect();
        let parents: HashMap<NodeId, Option<NodeId>> = live
            .iter()
            .filter_map(|id| self.get(*id).map(|n| (*id, n.parent)))
            .collect();

        for id in &live {
            let mut seen = HashSet::new();
            if let Some(node) = self.slot_node_mut(*id) {
                let before = node.children.len();
                node.children.retain(|c| {
                    parents.get(c).copied().flatten() == Some(*id) && seen.insert(*c)
                });
                fixes += before - node.children.len();
            }
        }

        for (child, parent) in &parents {
            if let Some(p) = parent
                && let Some(parent_node) = self.slot_node_mut(*p)
                && !parent_node.children.contains(child)
            {
                parent_node.children.push(*child);
                fixes += 1;
            }
        }

        let before = self.names.len();
        let slots = &self.slots;
        self.names.retain(|_, id| {
            slots
                .get(id.index as usize)
                .is_some_and(|s| s.generation == id.generation && s.node.is_some())
        });
        fixes += before - self.names.len();

        if fixes > 0 {
            debug!(fixes, "repaired pose tree links");
        }
        fixes
    }

    // ── Internal helpers ───────────────────────────────────────────────────

    fn require(&self, id: NodeId) -> Result<&PoseNode, WardenError> {
        self.get(id)
            .ok_or_else(|| WardenError::Hierarchy(format!("stale node handle {id:?}")))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut PoseNode, WardenError> {
        self.slot_node_mut(id)
            .ok_or_else(|| WardenError::Hierarchy(format!("stale node handle {id:?}")))
    }

    fn slot_node_mut(&mut self, id: NodeId) -> Option<&mut PoseNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    /// `true` when `ancestor` is `node` or lies on `node`'s parent chain.
    fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        let mut steps = 0;
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.get(c).and_then(|n| n.parent);
            steps += 1;
            if steps > self.slots.len() {
                return true;
            }
        }
        false
    }

    fn label(&self, id: NodeId) -> String {
        self.name_of(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{id:?}"))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn at(x: f32, y: f32, z: f32) -> Pose {
        Pose::new(Vec3::new(x, y, z), Quaternion::identity())
    }

    /// rig → head, rig → avatar → left_hand
    fn rig() -> (PoseTree, NodeId, NodeId, NodeId, NodeId) {
        let mut tree = PoseTree::new();
        let rig = tree.spawn("rig", None, Pose::identity(), 0.0).unwrap();
        let head = tree.spawn("head", Some(rig), at(0.0, 1.6, 0.0), 0.05).unwrap();
        let avatar = tree.spawn("avatar", Some(rig), Pose::identity(), 0.1).unwrap();
        let hand = tree
            .spawn("left_hand", Some(avatar), at(-0.3, 1.0, 0.2), 0.1)
            .unwrap();
        (tree, rig, head, avatar, hand)
    }

    #[test]
    fn spawn_links_parent_and_child() {
        let (tree, rig, head, avatar, _) = rig();
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.get(head).unwrap().parent(), Some(rig));
        assert_eq!(tree.get(head).unwrap().declared_parent(), Some(rig));
        assert_eq!(tree.get(rig).unwrap().children(), &[head, avatar]);
        assert_eq!(tree.find("head"), Some(head));
    }

    #[test]
    fn spawn_starts_at_canonical_pose() {
        let (tree, _, head, _, _) = rig();
        let node = tree.get(head).unwrap();
        assert_eq!(node.local_pose(), node.canonical_local_pose());
        assert_eq!(node.displacement(), 0.0);
    }

    #[test]
    fn duplicate_name_rejected() {
        let (mut tree, rig, ..) = rig();
        let err = tree.spawn("head", Some(rig), Pose::identity(), 0.1);
        assert!(matches!(err, Err(WardenError::Hierarchy(_))));
    }

    #[test]
    fn non_finite_canonical_rejected() {
        let mut tree = PoseTree::new();
        let err = tree.spawn("bad", None, at(f32::NAN, 0.0, 0.0), 0.1);
        assert!(matches!(err, Err(WardenError::InvalidPose { .. })));
    }

    #[test]
    fn despawn_removes_subtree_and_invalidates_handles() {
        let (mut tree, rig, _, avatar, hand) = rig();
        let removed = tree.despawn(avatar).unwrap();
        assert_eq!(removed, vec!["avatar".to_string(), "left_hand".to_string()]);
        assert!(!tree.contains(avatar));
        assert!(!tree.contains(hand));
        assert!(tree.find("left_hand").is_none());
        assert_eq!(tree.get(rig).unwrap().children().len(), 1);
    }

    #[test]
    fn respawned_slot_does_not_alias_old_handle() {
        let (mut tree, rig, _, avatar, _) = rig();
        tree.despawn(avatar).unwrap();
        let fresh = tree.spawn("avatar", Some(rig), Pose::identity(), 0.1).unwrap();
        assert_ne!(fresh, avatar);
        assert!(tree.get(avatar).is_none());
        assert_eq!(tree.find("avatar"), Some(fresh));
    }

    #[test]
    fn attach_moves_actual_parent_only() {
        let (mut tree, rig, head, avatar, _) = rig();
        tree.attach(head, Some(avatar)).unwrap();
        let node = tree.get(head).unwrap();
        assert_eq!(node.parent(), Some(avatar));
        assert_eq!(node.declared_parent(), Some(rig));
        assert!(tree.get(avatar).unwrap().children().contains(&head));
        assert!(!tree.get(rig).unwrap().children().contains(&head));
        assert!(tree.audit().is_clean());
    }

    #[test]
    fn reparent_moves_declared_parent_too() {
        let (mut tree, _, head, avatar, _) = rig();
        tree.reparent(head, Some(avatar)).unwrap();
        assert_eq!(tree.get(head).unwrap().declared_parent(), Some(avatar));
    }

    #[test]
    fn attach_rejects_cycles_and_self() {
        let (mut tree, rig, _, avatar, hand) = rig();
        assert!(matches!(
            tree.attach(rig, Some(hand)),
            Err(WardenError::Hierarchy(_))
        ));
        assert!(matches!(
            tree.attach(avatar, Some(avatar)),
            Err(WardenError::Hierarchy(_))
        ));
    }

    #[test]
    fn attach_to_stale_handle_rejected() {
        let (mut tree, _, head, avatar, _) = rig();
        tree.despawn(avatar).unwrap();
        assert!(tree.attach(head, Some(avatar)).is_err());
    }

    #[test]
    fn inactive_ancestor_deactivates_subtree() {
        let (mut tree, _, head, avatar, hand) = rig();
        tree.set_active(avatar, false).unwrap();
        assert!(!tree.is_active_in_hierarchy(hand));
        assert!(tree.is_active_in_hierarchy(head));
        tree.set_active(avatar, true).unwrap();
        assert!(tree.is_active_in_hierarchy(hand));
    }

    #[test]
    fn world_pose_composes_chain() {
        let (mut tree, rig, head, ..) = rig();
        tree.set_local_pose(rig, Pose::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::from_yaw(FRAC_PI_2)))
            .unwrap();
        tree.set_local_position(head, Vec3::new(0.0, 1.6, 1.0)).unwrap();
        let world = tree.world_pose(head).unwrap();
        // Local +Z becomes world +X after the quarter turn.
        assert!((world.position.x - 2.0).abs() < 1e-4, "x={}", world.position.x);
        assert!((world.position.y - 1.6).abs() < 1e-4);
        assert!(world.position.z.abs() < 1e-4);
    }

    #[test]
    fn set_world_pose_round_trips() {
        let (mut tree, rig, _, _, hand) = rig();
        tree.set_local_pose(rig, Pose::new(Vec3::new(5.0, 0.0, -1.0), Quaternion::from_yaw(0.4)))
            .unwrap();
        let target = Pose::new(Vec3::new(1.0, 2.0, 3.0), Quaternion::from_yaw(-0.3));
        tree.set_world_pose(hand, target).unwrap();
        let world = tree.world_pose(hand).unwrap();
        assert!(world.position.distance(target.position) < 1e-4);
        assert!(world.rotation.angle_to(target.rotation) < 2e-3);
    }

    #[test]
    fn audit_and_repair_fix_corrupted_links() {
        let (mut tree, rig, head, avatar, _) = rig();
        // Corrupt the lists directly: rig forgets head, avatar claims it.
        tree.slot_node_mut(rig).unwrap().children.retain(|c| *c != head);
        tree.slot_node_mut(avatar).unwrap().children.push(head);
        let audit = tree.audit();
        assert_eq!(audit.parent_child_mismatches, 2);

        let fixes = tree.repair_links();
        assert_eq!(fixes, 2);
        assert!(tree.audit().is_clean());
        assert!(tree.get(rig).unwrap().children().contains(&head));
    }

    #[test]
    fn repair_prunes_dangling_links_and_names() {
        let (mut tree, rig, head, ..) = rig();
        let ghost = NodeId {
            index: 99,
            generation: 0,
        };
        tree.slot_node_mut(rig).unwrap().children.push(ghost);
        tree.names.insert("ghost".to_string(), ghost);
        let audit = tree.audit();
        assert_eq!(audit.dangling_child_links, 1);
        assert_eq!(audit.stale_name_entries, 1);

        tree.repair_links();
        assert!(tree.audit().is_clean());
        assert_eq!(tree.find("head"), Some(head));
    }
}
