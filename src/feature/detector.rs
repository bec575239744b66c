use std::sync::Arc;

use nalgebra::Vector2;
use opencv::core::{Mat, Point2f, Point2i, Rect, Scalar, Vector, CV_16U, CV_32F, CV_8UC1};
use opencv::imgproc::LINE_8;
use opencv::prelude::*;

use super::region::RegionBounds;
use crate::config::DetectorConfig;
use crate::data::{Feature, Frame, Landmark};
use crate::global_types::IdGenerator;
use crate::utility::Utility;

/// Finds new landmarks in one polar cell of a frame.
pub trait Detector: Send {
    /// Append landmarks observed in `frame` whose pixel lies inside `bounds`.
    /// Returns how many were added.
    fn detect_in_radial_region(
        &mut self,
        frame: &Frame,
        landmarks: &mut Vec<Landmark>,
        bounds: &RegionBounds,
    ) -> anyhow::Result<usize>;
}

/// Shi-Tomasi corners restricted to a polar sector.
pub struct GoodFeaturesDetector {
    config: DetectorConfig,
    ids: Arc<IdGenerator>,
}

impl GoodFeaturesDetector {
    pub fn new(config: DetectorConfig, ids: Arc<IdGenerator>) -> Self {
        Self { config, ids }
    }

    /// 255 inside the sector, 0 elsewhere and around features already
    /// observed in the frame. Covers only `rect`, in its local coordinates.
    fn set_mask(
        &self,
        frame: &Frame,
        landmarks: &[Landmark],
        bounds: &RegionBounds,
        rect: Rect,
    ) -> anyhow::Result<Mat> {
        let (width, height) = frame.image_size();
        let mut mask =
            Mat::new_rows_cols_with_default(rect.height, rect.width, CV_8UC1, Scalar::from(0))?;
        {
            let data = mask.data_bytes_mut()?;
            for v in 0..rect.height {
                for u in 0..rect.width {
                    let pixel = Vector2::new((rect.x + u) as f64, (rect.y + v) as f64);
                    if bounds.contains_pixel(&pixel, width, height) {
                        data[(v * rect.width + u) as usize] = 255;
                    }
                }
            }
        }
        for obs in landmarks
            .iter()
            .filter_map(|l| l.observation_by_frame_id(frame.id()))
        {
            let pt = obs.keypoint();
            opencv::imgproc::circle(
                &mut mask,
                Point2i::new(pt.x as i32 - rect.x, pt.y as i32 - rect.y),
                self.config.min_distance,
                Scalar::from(0),
                -1,
                LINE_8,
                0,
            )?;
        }
        Ok(mask)
    }

    /// Range along the bearing ray, in metres.
    fn depth_at(depth_image: &Mat, pixel: &Point2f) -> anyhow::Result<Option<f64>> {
        let (u, v) = (pixel.x.round() as i32, pixel.y.round() as i32);
        if u < 0 || v < 0 || u >= depth_image.cols() || v >= depth_image.rows() {
            return Ok(None);
        }
        let depth = match depth_image.depth() {
            CV_32F => *depth_image.at_2d::<f32>(v, u)? as f64,
            CV_16U => *depth_image.at_2d::<u16>(v, u)? as f64 / 1000.0,
            other => anyhow::bail!("unsupported depth image depth {other}"),
        };
        Ok((depth.is_finite() && depth > 0.0).then_some(depth))
    }
}

impl Detector for GoodFeaturesDetector {
    fn detect_in_radial_region(
        &mut self,
        frame: &Frame,
        landmarks: &mut Vec<Landmark>,
        bounds: &RegionBounds,
    ) -> anyhow::Result<usize> {
        super::ensure_decompressed(frame)?;
        let (width, height) = frame.image_size();
        let Some(rect) = bounds.pixel_rect(width, height) else {
            return Ok(0);
        };
        let mask = self.set_mask(frame, landmarks, bounds, rect)?;
        if opencv::core::count_non_zero(&mask)? == 0 {
            return Ok(0);
        }
        // 只在区域的外接矩形内检测
        let patch = frame.image().apply_1(rect)?.try_clone()?;
        let gray = super::to_gray(&patch)?;

        let mut corners = Vector::<Point2f>::new();
        opencv::imgproc::good_features_to_track(
            &gray,
            &mut corners,
            self.config.max_features_per_region,
            self.config.quality_level,
            self.config.min_distance as f64,
            &mask,
            self.config.block_size,
            false,
            0.04,
        )?;

        let offset = Point2f::new(rect.x as f32, rect.y as f32);
        let depth_image = frame.depth_image().filter(|_| frame.has_pose());
        let mut added = 0;
        for corner in corners.iter().map(|c| c + offset) {
            let pixel = Vector2::new(corner.x as f64, corner.y as f64);
            // the rasterized mask may be a pixel wider than the sector
            if !bounds.contains_pixel(&pixel, width, height) {
                continue;
            }
            let mut landmark = Landmark::new(self.ids.next_id());
            landmark.add_observation(Feature::new(frame.id(), corner))?;
            if let (Some(depth_image), Some(pose)) = (depth_image, frame.pose()) {
                if let Some(depth) = Self::depth_at(depth_image, &corner)? {
                    let point = frame.camera_model().unproject_to_bearing(&pixel) * depth;
                    landmark.set_ground_truth(Utility::transform_point(pose, &point));
                }
            }
            landmarks.push(landmark);
            added += 1;
        }
        log::debug!(
            "frame {}: detected {added} features in r=[{:.1}, {:.1}) t=[{:.2}, {:.2})",
            frame.id(),
            bounds.r_min,
            bounds.r_max,
            bounds.t_min,
            bounds.t_max
        );
        Ok(added)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::test_camera;
    use crate::feature::region::{RegionCell, RegionGrid};
    use opencv::core::CV_32FC1;

    /// Black image with a lattice of white squares.
    pub(crate) fn checkerboard(size: i32) -> Mat {
        checkerboard_at(size, 0, 0)
    }

    /// [checkerboard] moved right by `dx` and down by `dy`.
    pub(crate) fn checkerboard_at(size: i32, dx: i32, dy: i32) -> Mat {
        let mut image = Mat::new_rows_cols_with_default(size, size, CV_8UC1, Scalar::from(0)).unwrap();
        for y in (10..size - 20).step_by(40) {
            for x in (10..size - 20).step_by(40) {
                opencv::imgproc::rectangle(
                    &mut image,
                    Rect::new(x + dx, y + dy, 20, 20),
                    Scalar::from(255),
                    -1,
                    LINE_8,
                    0,
                )
                .unwrap();
            }
        }
        image
    }

    fn quadrant_bounds() -> RegionBounds {
        let grid = RegionGrid::with_uniform_sectors(vec![0.0, 0.1, 0.4, 0.7], 4).unwrap();
        // second ring, sector [0, pi/2): lower right of the center
        grid.bounds(RegionCell { radial: 1, angular: 2 }, 200.0)
    }

    #[test]
    fn test_detections_confined_to_bounds() {
        let ids = Arc::new(IdGenerator::new());
        let frame = Frame::builder(checkerboard(200), 0.0, test_camera(200, 200))
            .build(&IdGenerator::starting_at(7));
        let mut detector = GoodFeaturesDetector::new(
            DetectorConfig {
                max_features_per_region: 500,
                min_distance: 5,
                ..Default::default()
            },
            ids.clone(),
        );
        let bounds = quadrant_bounds();
        let mut landmarks = Vec::new();
        let added = detector
            .detect_in_radial_region(&frame, &mut landmarks, &bounds)
            .unwrap();
        assert!(added > 0);
        assert_eq!(added, landmarks.len());
        for (i, landmark) in landmarks.iter().enumerate() {
            assert_eq!(landmark.id(), i);
            assert_eq!(landmark.num_observations(), 1);
            let obs = landmark.observation_by_frame_id(7).unwrap();
            assert!(bounds.contains_pixel(&obs.pixel(), 200, 200));
            assert!(!landmark.has_ground_truth());
        }

        // a second pass keeps its distance from what is already observed
        let first: Vec<Point2f> = landmarks
            .iter()
            .map(|l| l.first_observation().unwrap().keypoint())
            .collect();
        let again = detector
            .detect_in_radial_region(&frame, &mut landmarks, &bounds)
            .unwrap();
        for landmark in landmarks[added..].iter() {
            let pt = landmark.first_observation().unwrap().keypoint();
            assert!(first.iter().all(|f| super::super::distance(f, &pt) > 5.0));
        }
        assert_eq!(ids.peek(), added + again);
    }

    #[test]
    fn test_ground_truth_from_depth() {
        let depth = Mat::new_rows_cols_with_default(200, 200, CV_32FC1, Scalar::all(2.0)).unwrap();
        let frame = Frame::builder(checkerboard(200), 0.0, test_camera(200, 200))
            .pose(Utility::identity_pose())
            .depth_image(depth)
            .build(&IdGenerator::new());
        let mut detector = GoodFeaturesDetector::new(DetectorConfig::default(), Arc::new(IdGenerator::new()));
        let mut landmarks = Vec::new();
        detector
            .detect_in_radial_region(&frame, &mut landmarks, &quadrant_bounds())
            .unwrap();
        assert!(!landmarks.is_empty());
        for landmark in landmarks.iter() {
            let gt = landmark.ground_truth().unwrap();
            assert!((gt.norm() - 2.0).abs() < 1e-9);
            let pixel = frame.camera_model().project_to_image(gt).unwrap();
            assert!((pixel - landmark.first_observation().unwrap().pixel()).norm() < 1e-3);
        }
    }

    #[test]
    fn test_sector_outside_image_detects_nothing() {
        let frame = Frame::builder(checkerboard(100), 0.0, test_camera(100, 100))
            .build(&IdGenerator::new());
        let mut detector = GoodFeaturesDetector::new(DetectorConfig::default(), Arc::new(IdGenerator::new()));
        let grid = RegionGrid::with_uniform_sectors(vec![0.0, 0.8, 1.5], 1).unwrap();
        let bounds = grid.bounds(RegionCell { radial: 1, angular: 0 }, 100.0);
        let mut landmarks = Vec::new();
        assert_eq!(
            detector
                .detect_in_radial_region(&frame, &mut landmarks, &bounds)
                .unwrap(),
            0
        );
        assert!(landmarks.is_empty());
    }

    #[test]
    fn test_compressed_frame_is_rejected() {
        let mut frame = Frame::builder(checkerboard(100), 0.0, test_camera(100, 100))
            .build(&IdGenerator::new());
        frame.compress_images().unwrap();
        let mut detector = GoodFeaturesDetector::new(DetectorConfig::default(), Arc::new(IdGenerator::new()));
        let grid = RegionGrid::with_uniform_sectors(vec![0.0, 0.5], 1).unwrap();
        let bounds = grid.bounds(RegionCell { radial: 0, angular: 0 }, 100.0);
        assert!(detector
            .detect_in_radial_region(&frame, &mut Vec::new(), &bounds)
            .is_err());
    }
}
