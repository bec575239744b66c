use nalgebra::Vector3;

use crate::data::{Frame, Landmark};
use crate::module::StereoModule;
use crate::utility::Utility;

/// Positions landmarks from the mono and stereo observations of one frame.
///
/// Only landmarks without a position are touched; the result is placed in the
/// world through the frame's estimated pose, or its ground-truth pose when no
/// estimate exists yet.
pub struct StereoTriangulator {
    /// Degrees.
    min_triangulation_angle: f64,
}

impl StereoTriangulator {
    pub fn new(min_triangulation_angle: f64) -> Self {
        Self {
            min_triangulation_angle,
        }
    }
}

impl StereoModule for StereoTriangulator {
    fn update(&mut self, frame: &Frame, landmarks: &mut [Landmark]) -> anyhow::Result<usize> {
        let (Some(stereo_pose), Some(pose)) = (
            frame.stereo_pose(),
            frame.estimated_pose().or(frame.pose()),
        ) else {
            return Ok(0);
        };
        let primary = Utility::identity_pose();
        let inv_stereo = Utility::invert_pose(stereo_pose);

        let mut count = 0;
        for landmark in landmarks.iter_mut().filter(|l| !l.has_estimated_position()) {
            let (Some(mono), Some(stereo)) = (
                landmark.observation_by_frame_id(frame.id()),
                landmark.stereo_observation_by_frame_id(frame.id()),
            ) else {
                continue;
            };
            let bearing = frame.camera_model().unproject_to_bearing(&mono.pixel());
            let stereo_bearing = frame
                .stereo_camera_model()
                .unproject_to_bearing(&stereo.pixel());
            let Some(point) = super::triangulate_point(&bearing, &stereo_bearing, &primary, &inv_stereo)
            else {
                continue;
            };
            if super::triangulation_angle(&point, &primary, stereo_pose) < self.min_triangulation_angle {
                continue;
            }
            let world: Vector3<f64> = Utility::transform_point(pose, &point);
            landmark.set_estimated_position(world);
            count += 1;
        }
        log::debug!("frame {}: {count} landmarks from stereo", frame.id());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{test_camera, Feature};
    use crate::global_types::IdGenerator;
    use opencv::core::{Mat, Point2f};

    #[test]
    fn test_stereo_pair_positions_landmark() {
        let camera = test_camera(640, 480);
        let baseline = Utility::from_parts(&nalgebra::Matrix3::identity(), &Vector3::new(0.2, 0.0, 0.0));
        let world_pose = Utility::from_parts(&nalgebra::Matrix3::identity(), &Vector3::new(1.0, 2.0, 0.0));
        let mut frame = Frame::builder(Mat::default(), 0.0, camera.clone())
            .stereo(Mat::default(), baseline, camera.clone())
            .build(&IdGenerator::new());
        frame.set_estimated_pose(world_pose);

        let point = Vector3::new(0.3, -0.1, 4.0);
        let px = camera.project_to_image(&point).unwrap();
        let stereo_px = camera
            .project_to_image(&Utility::transform_point(&Utility::invert_pose(&baseline), &point))
            .unwrap();
        let to_pt = |p: nalgebra::Vector2<f64>| Point2f::new(p.x as f32, p.y as f32);

        let mut landmarks = vec![Landmark::new(0), Landmark::new(1)];
        landmarks[0]
            .add_observation(Feature::new(frame.id(), to_pt(px)))
            .unwrap();
        landmarks[0]
            .add_stereo_observation(Feature::new(frame.id(), to_pt(stereo_px)))
            .unwrap();
        // mono only
        landmarks[1]
            .add_observation(Feature::new(frame.id(), to_pt(px)))
            .unwrap();

        let mut stereo = StereoTriangulator::new(1.0);
        assert_eq!(stereo.update(&frame, &mut landmarks).unwrap(), 1);
        let expected = Utility::transform_point(&world_pose, &point);
        assert!((landmarks[0].estimated_position().unwrap() - expected).norm() < 1e-3);
        assert!(!landmarks[1].has_estimated_position());

        // already positioned landmarks are left alone
        assert_eq!(stereo.update(&frame, &mut landmarks).unwrap(), 0);
    }

    #[test]
    fn test_needs_a_stereo_pose() {
        let frame = Frame::builder(Mat::default(), 0.0, test_camera(64, 64))
            .pose(Utility::identity_pose())
            .build(&IdGenerator::new());
        let mut stereo = StereoTriangulator::new(1.0);
        assert_eq!(stereo.update(&frame, &mut [Landmark::new(0)]).unwrap(), 0);
    }
}
