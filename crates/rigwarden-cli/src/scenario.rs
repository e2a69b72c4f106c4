//! Scripted disturbances applied to the rig between frames.
//!
//! Each entry stands in for something a scene script, physics or a scene
//! reload might do to the avatar; the warden is expected to undo it.

use rigwarden_runtime::FrameLoop;
use rigwarden_spatial::{NodeId, Pose, Quaternion, Vec3};
use rigwarden_types::WardenError;
use serde::{Deserialize, Serialize};

/// One scripted tamper, applied just before frame `frame` runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disturbance {
    pub frame: u64,
    pub node: String,
    pub action: DisturbanceAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisturbanceAction {
    /// Nudge the local position.
    Offset { by: Vec3 },
    /// Overwrite the local position.
    MoveTo { to: Vec3 },
    /// Write NaN into the local position.
    Corrupt,
    /// Attach under a foreign parent without touching the declared one.
    Steal { parent: String },
    Disable,
    Enable,
    /// Tear the node and its subtree down.
    Despawn,
    /// Recreate the node from the rig blueprint.
    Respawn,
    /// Turn the node about +Y.
    Yaw { radians: f32 },
}

impl Disturbance {
    pub fn apply(&self, warden: &mut FrameLoop) -> Result<(), WardenError> {
        if self.action == DisturbanceAction::Respawn {
            return warden.respawn(&self.node).map(|_| ());
        }

        let id = lookup(warden, &self.node)?;
        match &self.action {
            DisturbanceAction::Offset { by } => {
                let pose = local_pose(warden, id)?;
                warden.tree_mut().set_local_position(id, pose.position.add(*by))
            }
            DisturbanceAction::MoveTo { to } => warden.tree_mut().set_local_position(id, *to),
            DisturbanceAction::Corrupt => warden
                .tree_mut()
                .set_local_position(id, Vec3::new(f32::NAN, f32::NAN, f32::NAN)),
            DisturbanceAction::Steal { parent } => {
                let parent = lookup(warden, parent)?;
                warden.tree_mut().attach(id, Some(parent))
            }
            DisturbanceAction::Disable => warden.tree_mut().set_active(id, false),
            DisturbanceAction::Enable => warden.tree_mut().set_active(id, true),
            DisturbanceAction::Despawn => warden.tree_mut().despawn(id).map(|_| ()),
            DisturbanceAction::Yaw { radians } => {
                let mut pose = local_pose(warden, id)?;
                pose.rotation = pose.rotation.mul(Quaternion::from_yaw(*radians));
                warden.tree_mut().set_local_pose(id, pose)
            }
            DisturbanceAction::Respawn => Ok(()),
        }
    }

    /// One-line description for the replay output.
    pub fn describe(&self) -> String {
        let what = match &self.action {
            DisturbanceAction::Offset { by } => {
                format!("offset by ({:.2}, {:.2}, {:.2})", by.x, by.y, by.z)
            }
            DisturbanceAction::MoveTo { to } => {
                format!("moved to ({:.2}, {:.2}, {:.2})", to.x, to.y, to.z)
            }
            DisturbanceAction::Corrupt => "corrupted with NaN".to_string(),
            DisturbanceAction::Steal { parent } => format!("attached under {parent}"),
            DisturbanceAction::Disable => "disabled".to_string(),
            DisturbanceAction::Enable => "enabled".to_string(),
            DisturbanceAction::Despawn => "despawned".to_string(),
            DisturbanceAction::Respawn => "respawned".to_string(),
            DisturbanceAction::Yaw { radians } => format!("yawed {radians:.2} rad"),
        };
        format!("{} {}", self.node, what)
    }
}

fn lookup(warden: &FrameLoop, name: &str) -> Result<NodeId, WardenError> {
    warden
        .tree()
        .find(name)
        .ok_or_else(|| WardenError::UnknownNode(name.to_string()))
}

fn local_pose(warden: &FrameLoop, id: NodeId) -> Result<Pose, WardenError> {
    warden
        .tree()
        .local_pose(id)
        .ok_or_else(|| WardenError::Hierarchy(format!("stale handle {id:?}")))
}
