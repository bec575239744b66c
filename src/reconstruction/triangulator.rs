use crate::config::ReconstructionConfig;
use crate::data::{frame_by_id, Feature, Frame, Landmark};
use crate::module::ReconstructionModule;
use crate::utility::Utility;

/// Two-view triangulation between the oldest and newest observations of a
/// landmark whose frames have estimated poses.
pub struct Triangulator {
    config: ReconstructionConfig,
}

impl Triangulator {
    pub fn new(config: ReconstructionConfig) -> Self {
        Self { config }
    }

    fn reprojection_error(frame: &Frame, obs: &Feature, point: &nalgebra::Vector3<f64>) -> Option<f64> {
        let inv_pose = frame.estimated_inverse_pose()?;
        let pixel = frame
            .camera_model()
            .project_to_image(&Utility::transform_point(inv_pose, point))?;
        Some((pixel - obs.pixel()).norm())
    }

    /// Oldest and newest observation whose frames carry an estimate.
    fn baseline<'a>(
        landmark: &'a Landmark,
        frames: &'a [Frame],
    ) -> Option<((&'a Feature, &'a Frame), (&'a Feature, &'a Frame))> {
        let mut estimated = landmark.observations().iter().filter_map(|obs| {
            frame_by_id(frames, obs.frame_id())
                .filter(|f| f.has_estimated_pose())
                .map(|f| (obs, f))
        });
        let first = estimated.next()?;
        let last = estimated.last()?;
        Some((first, last))
    }

    fn triangulate(&self, landmark: &Landmark, frames: &[Frame]) -> Option<nalgebra::Vector3<f64>> {
        let ((obs_i, frame_i), (obs_j, frame_j)) = Self::baseline(landmark, frames)?;
        let bearing_i = frame_i.camera_model().unproject_to_bearing(&obs_i.pixel());
        let bearing_j = frame_j.camera_model().unproject_to_bearing(&obs_j.pixel());
        let point = super::triangulate_point(
            &bearing_i,
            &bearing_j,
            frame_i.estimated_inverse_pose()?,
            frame_j.estimated_inverse_pose()?,
        )?;

        let angle =
            super::triangulation_angle(&point, frame_i.estimated_pose()?, frame_j.estimated_pose()?);
        if angle < self.config.min_triangulation_angle {
            return None;
        }
        if self.config.max_reprojection_error > 0.0 {
            let err_i = Self::reprojection_error(frame_i, obs_i, &point)?;
            let err_j = Self::reprojection_error(frame_j, obs_j, &point)?;
            if err_i.max(err_j) > self.config.max_reprojection_error {
                return None;
            }
        }
        Some(point)
    }
}

impl ReconstructionModule for Triangulator {
    /// Landmarks seen in the latest frame are re-triangulated as their
    /// baseline grows; a failed attempt keeps any earlier position.
    fn update(&mut self, landmarks: &mut [Landmark], frames: &[Frame]) -> anyhow::Result<usize> {
        let Some(latest) = frames.last() else {
            return Ok(0);
        };
        if !latest.has_estimated_pose() {
            return Ok(0);
        }
        let mut count = 0;
        for landmark in landmarks
            .iter_mut()
            .filter(|l| l.num_observations() >= 2 && l.is_observed_in_frame(latest.id()))
        {
            if let Some(point) = self.triangulate(landmark, frames) {
                landmark.set_estimated_position(point);
                count += 1;
            }
        }
        log::debug!("frame {}: triangulated {count} landmarks", latest.id());
        Ok(count)
    }
}
