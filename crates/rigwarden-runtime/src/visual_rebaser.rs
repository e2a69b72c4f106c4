//! [`VisualRebaser`] – places the avatar under the user's head.
//!
//! Runs last in the frame, after the head has been validated.  The target is
//! the head's world position dropped to ground level, facing the head's
//! heading (yaw only, taken from the forward vector flattened onto the
//! ground plane).
//!
//! Bad input never moves the avatar: a non-finite or unvalidated head leaves
//! the previous target in place, and a head looking straight up or down
//! (flattened forward shorter than `heading_epsilon`) keeps the previous
//! heading.

use rigwarden_spatial::{NodeId, Pose, PoseTree, Quaternion, Vec3};
use rigwarden_types::WardenError;
use tracing::{debug, trace};

pub struct VisualRebaser {
    ground_height: f32,
    heading_epsilon: f32,
    heading: f32,
    target: Option<Pose>,
}

impl VisualRebaser {
    pub fn new(ground_height: f32, heading_epsilon: f32) -> Self {
        Self {
            ground_height,
            heading_epsilon,
            heading: 0.0,
            target: None,
        }
    }

    /// Last target written, if any.
    pub fn target(&self) -> Option<Pose> {
        self.target
    }

    /// Current heading in radians; positive turns +Z towards +X.
    pub fn heading(&self) -> f32 {
        self.heading
    }

    /// Derive a new target from a validated head world pose.  Returns `None`
    /// (and keeps the previous target) for non-finite input.
    pub fn compute(&mut self, head_world: Pose) -> Option<Pose> {
        if !head_world.is_finite() {
            debug!("head pose non-finite; keeping previous avatar target");
            return None;
        }

        let forward = head_world.rotation.rotate(Vec3::FORWARD);
        let flat = Vec3::new(forward.x, 0.0, forward.z);
        if flat.length() >= self.heading_epsilon {
            self.heading = flat.x.atan2(flat.z);
        } else {
            trace!("flattened forward degenerate; keeping previous heading");
        }

        let target = Pose::new(
            Vec3::new(head_world.position.x, self.ground_height, head_world.position.z),
            Quaternion::from_yaw(self.heading),
        );
        self.target = Some(target);
        Some(target)
    }

    /// Rebase `visual_root` from `head_world`.  `None` means the head was not
    /// validated this frame.  Returns `true` when the visual root was written.
    pub fn apply(
        &mut self,
        tree: &mut PoseTree,
        visual_root: NodeId,
        head_world: Option<Pose>,
    ) -> Result<bool, WardenError> {
        let Some(head) = head_world else {
            trace!("head not validated this frame; avatar left in place");
            return Ok(false);
        };
        let Some(target) = self.compute(head) else {
            return Ok(false);
        };
        tree.set_world_pose(visual_root, target)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn head(x: f32, y: f32, z: f32, rotation: Quaternion) -> Pose {
        Pose::new(Vec3::new(x, y, z), rotation)
    }

    #[test]
    fn target_drops_head_to_ground() {
        let mut rebaser = VisualRebaser::new(0.0, 1e-3);
        let target = rebaser
            .compute(head(1.0, 1.7, -2.0, Quaternion::identity()))
            .unwrap();
        assert_eq!(target.position, Vec3::new(1.0, 0.0, -2.0));
        assert!(target.rotation.angle_to(Quaternion::identity()) < 2e-3);
    }

    #[test]
    fn heading_follows_yaw() {
        let mut rebaser = VisualRebaser::new(0.0, 1e-3);
        rebaser.compute(head(0.0, 1.6, 0.0, Quaternion::from_yaw(FRAC_PI_2)));
        assert!((rebaser.heading() - FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn pitch_and_roll_are_discarded() {
        // Yaw 0.5 then a 30° nod about local X.
        let nod = Quaternion::new((0.2618f32).cos(), (0.2618f32).sin(), 0.0, 0.0);
        let rotation = Quaternion::from_yaw(0.5).mul(nod);
        let mut rebaser = VisualRebaser::new(0.0, 1e-3);
        let target = rebaser.compute(head(0.0, 1.6, 0.0, rotation)).unwrap();
        assert!((rebaser.heading() - 0.5).abs() < 1e-3);
        assert!(target.rotation.angle_to(Quaternion::from_yaw(0.5)) < 2e-3);
    }

    #[test]
    fn looking_straight_down_keeps_previous_heading() {
        let mut rebaser = VisualRebaser::new(0.0, 1e-3);
        rebaser.compute(head(0.0, 1.6, 0.0, Quaternion::from_yaw(0.7)));
        // Pitch 90° down: forward points along -Y.
        let half = FRAC_PI_2 * 0.5;
        let down = Quaternion::new(half.cos(), half.sin(), 0.0, 0.0);
        rebaser.compute(head(2.0, 1.6, 0.0, down));
        assert!((rebaser.heading() - 0.7).abs() < 1e-4);
        assert_eq!(rebaser.target().unwrap().position.x, 2.0);
    }

    #[test]
    fn non_finite_input_keeps_previous_target() {
        let mut rebaser = VisualRebaser::new(0.0, 1e-3);
        let first = rebaser
            .compute(head(1.0, 1.6, 1.0, Quaternion::identity()))
            .unwrap();
        assert!(rebaser
            .compute(head(f32::NAN, 1.6, 1.0, Quaternion::identity()))
            .is_none());
        assert_eq!(rebaser.target(), Some(first));
    }

    #[test]
    fn apply_writes_only_when_validated() {
        let mut tree = PoseTree::new();
        let root = tree.spawn("avatar_visual_root", None, Pose::identity(), 0.0).unwrap();
        let mut rebaser = VisualRebaser::new(0.05, 1e-3);

        assert!(!rebaser.apply(&mut tree, root, None).unwrap());
        assert_eq!(tree.local_pose(root), Some(Pose::identity()));

        let written = rebaser
            .apply(&mut tree, root, Some(head(3.0, 1.6, 4.0, Quaternion::identity())))
            .unwrap();
        assert!(written);
        assert_eq!(tree.world_pose(root).unwrap().position, Vec3::new(3.0, 0.05, 4.0));
    }
}
