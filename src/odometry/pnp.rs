use nalgebra::Vector3;
use opencv::core::{Mat, Point2d, Point3d, Vector, CV_64F};
use opencv::prelude::*;

use crate::config::PnpConfig;
use crate::data::{Frame, Landmark};
use crate::global_cast::{RotationVector, Vector3d};
use crate::global_types::{FrameId, LandmarkId, Pose};
use crate::module::OdometryModule;
use crate::utility::Utility;

/// Pose of the latest frame by RANSAC PnP against positioned landmarks.
///
/// The first frame has no landmarks to work with; it is anchored at its
/// ground-truth pose if it has one, otherwise at the origin.
pub struct Pnp {
    config: PnpConfig,
    /// 没有估计位置时使用真值
    use_ground_truth_points: bool,
}

impl Pnp {
    /// Rays this close to the image plane are left out.
    const MIN_FORWARD: f64 = 0.1;

    pub fn new(config: PnpConfig) -> Self {
        Self {
            config,
            use_ground_truth_points: false,
        }
    }

    /// Fall back to landmark ground truth where no estimate exists.
    pub fn with_ground_truth_points(mut self) -> Self {
        self.use_ground_truth_points = true;
        self
    }

    fn position<'a>(&self, landmark: &'a Landmark) -> Option<&'a Vector3<f64>> {
        landmark.estimated_position().or_else(|| {
            if self.use_ground_truth_points {
                landmark.ground_truth()
            } else {
                None
            }
        })
    }

    /// World-to-camera transform and the IDs of the inlier landmarks.
    fn solve(
        &self,
        landmarks: &[Landmark],
        frame: &Frame,
    ) -> anyhow::Result<Option<(Pose, Vec<LandmarkId>)>> {
        let mut object_points = Vector::<Point3d>::new();
        let mut image_points = Vector::<Point2d>::new();
        let mut ids = Vec::new();
        for landmark in landmarks.iter() {
            let (Some(position), Some(obs)) = (
                self.position(landmark),
                landmark.observation_by_frame_id(frame.id()),
            ) else {
                continue;
            };
            let bearing = frame.camera_model().unproject_to_bearing(&obs.pixel());
            if bearing.z <= Self::MIN_FORWARD {
                continue;
            }
            object_points.push(Point3d::new(position.x, position.y, position.z));
            image_points.push(Point2d::new(bearing.x / bearing.z, bearing.y / bearing.z));
            ids.push(landmark.id());
        }
        if ids.len() < self.config.min_landmarks.max(4) {
            log::warn!(
                "frame {}: {} landmarks with positions, no pnp",
                frame.id(),
                ids.len()
            );
            return Ok(None);
        }

        // 无需校准相机内参，已经转换到归一化平面
        let cam_mat = Mat::eye(3, 3, CV_64F)?.to_mat()?;
        let dist = Mat::default();
        let mut rvec = Mat::default();
        let mut tvec = Mat::default();
        let mut inliers = Vector::<i32>::new();
        let threshold = self.config.reprojection_threshold / frame.camera_model().focal_length() as f32;
        let ok = opencv::calib3d::solve_pnp_ransac(
            &object_points,
            &image_points,
            &cam_mat,
            &dist,
            &mut rvec,
            &mut tvec,
            false,
            self.config.iterations,
            threshold,
            self.config.confidence,
            &mut inliers,
            opencv::calib3d::SOLVEPNP_ITERATIVE,
        )?;
        if !ok || inliers.len() < self.config.min_landmarks.max(4) {
            log::warn!("frame {}: pnp failed ({} inliers)", frame.id(), inliers.len());
            return Ok(None);
        }

        let rotation = RotationVector(Vector3d::try_from(&rvec)?.0).to_rotation();
        let translation = Vector3d::try_from(&tvec)?.0;
        let inv_pose = Utility::from_parts(rotation.matrix(), &translation);
        let inlier_ids = inliers
            .iter()
            .filter_map(|i| ids.get(i as usize).copied())
            .collect();
        Ok(Some((inv_pose, inlier_ids)))
    }
}

impl OdometryModule for Pnp {
    fn update(
        &mut self,
        landmarks: &mut [Landmark],
        frames: &mut [Frame],
        _keyframe: Option<FrameId>,
    ) -> anyhow::Result<()> {
        let anchored = frames.iter().any(Frame::has_estimated_pose);
        let Some(frame) = frames.last_mut() else {
            return Ok(());
        };
        if !anchored {
            let pose = frame
                .pose()
                .copied()
                .unwrap_or_else(Utility::identity_pose);
            log::info!("frame {}: trajectory anchored", frame.id());
            frame.set_estimated_pose(pose);
            return Ok(());
        }
        if let Some((inv_pose, inlier_ids)) = self.solve(landmarks, frame)? {
            log::debug!(
                "frame {}: pnp with {} inliers, t = {}",
                frame.id(),
                inlier_ids.len(),
                Utility::translation(&Utility::invert_pose(&inv_pose)).transpose()
            );
            frame.set_estimated_inverse_pose_with_landmarks(inv_pose, &inlier_ids);
        }
        Ok(())
    }
}
