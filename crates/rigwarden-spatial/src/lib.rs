//! `rigwarden-spatial` – poses and the pose hierarchy.
//!
//! # Modules
//!
//! - [`transform`] – [`Vec3`][transform::Vec3], [`Quaternion`][transform::Quaternion]
//!   and [`Pose`][transform::Pose]: the rigid-body math every other crate
//!   builds on.  The world is Y-up; a node's forward axis is local +Z.
//! - [`pose_tree`] – [`PoseTree`][pose_tree::PoseTree]: the arena of named
//!   pose nodes with their declared and actual parent/child ownership, plus
//!   the engine-level primitives (attach, enable/disable, teardown) that can
//!   silently break it.

pub mod pose_tree;
pub mod transform;

pub use pose_tree::{NodeId, PoseNode, PoseTree};
pub use transform::{Pose, Quaternion, Vec3};
