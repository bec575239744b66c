use std::collections::HashSet;

use nalgebra::{Vector2, Vector3};
use opencv::core::{Mat, Point2f};
use serde::Serialize;

use super::Visualization;
use crate::config::TrackingConfig;
use crate::data::{frame_by_id, Frame, Landmark};
use crate::feature::{Detector, RegionGrid, RegionOccupancy, Tracker};
use crate::global_types::FrameId;
use crate::odometry::OutlierChecker;
use crate::utility::Utility;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Uninitialized,
    Steady,
}

/// Error sample of a track with ground truth, measured against the keyframe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadialError {
    /// normalized radius of the ground-truth pixel
    pub radius: f64,
    pub error: f64,
    /// change of the reprojection error since the keyframe
    pub error_delta: f64,
    /// angle between observed and ground-truth flow
    pub angular_error: f64,
    pub bearing_error_delta: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrameError {
    pub track_length: usize,
    pub landmark_index: usize,
    pub radius: f64,
    pub error: f64,
    pub bearing_error: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RadialDistance {
    pub radius: f64,
    pub frame_num: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FrameTrackCount {
    pub frame_num: usize,
    pub num_tracked: usize,
}

/// Accumulated over the whole run, never truncated.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackingStats {
    /// Live counter per landmark index: frames it was tracked into.
    pub track_lengths: Vec<usize>,
    /// Observation count minus one of every track at the frame it failed.
    pub final_track_lengths: Vec<usize>,
    pub radial_errors: Vec<RadialError>,
    pub frame_errors: Vec<FrameError>,
    pub success_rad_dists: Vec<RadialDistance>,
    pub failure_rad_dists: Vec<RadialDistance>,
    pub frame_track_counts: Vec<FrameTrackCount>,
}

/// Owns the frame sequence and the landmark ledger, and keeps the feature
/// density of every polar region between the configured bounds.
pub struct TrackingModule {
    detector: Box<dyn Detector>,
    tracker: Box<dyn Tracker>,
    checker: Option<Box<dyn OutlierChecker>>,

    landmarks: Vec<Landmark>,
    frames: Vec<Frame>,

    grid: RegionGrid,
    occupancy: RegionOccupancy,
    config: TrackingConfig,
    visualization: Visualization,
    stats: TrackingStats,
    /// per landmark index: its failure is already in the statistics
    failure_recorded: Vec<bool>,

    last_keyframe: Option<FrameId>,
    frame_num: usize,
    state: TrackingState,
}

/// Ground truth of `landmark` seen from the ground-truth pose of `frame`.
fn project_ground_truth(frame: &Frame, landmark: &Landmark) -> Option<Vector2<f64>> {
    let inv_pose = frame.inverse_pose()?;
    let point = landmark.ground_truth()?;
    frame
        .camera_model()
        .project_to_image(&Utility::transform_point(inv_pose, point))
}

#[inline]
fn homogeneous_direction(d: &Vector2<f64>) -> Vector3<f64> {
    Vector3::new(d.x, d.y, 1.0).normalize()
}

#[inline]
fn to_point(pixel: &Vector2<f64>) -> Point2f {
    Point2f::new(pixel.x as f32, pixel.y as f32)
}

impl TrackingModule {
    pub fn new(
        detector: Box<dyn Detector>,
        tracker: Box<dyn Tracker>,
        checker: Option<Box<dyn OutlierChecker>>,
        config: TrackingConfig,
    ) -> anyhow::Result<Self> {
        let grid = RegionGrid::with_uniform_sectors(config.radial_bins.clone(), config.angular_bins)?;
        Ok(Self {
            detector,
            tracker,
            checker,
            landmarks: Vec::new(),
            frames: Vec::new(),
            occupancy: RegionOccupancy::new(&grid),
            grid,
            visualization: Visualization::new(config.track_fade, config.track_opacity),
            config,
            stats: TrackingStats::default(),
            failure_recorded: Vec::new(),
            last_keyframe: None,
            frame_num: 0,
            state: TrackingState::Uninitialized,
        })
    }

    /// Replace the uniform grid built from the config.
    pub fn with_region_grid(mut self, grid: RegionGrid) -> Self {
        self.occupancy = RegionOccupancy::new(&grid);
        self.grid = grid;
        self
    }

    pub fn state(&self) -> TrackingState {
        self.state
    }

    /// Number of frames processed so far.
    pub fn frame_num(&self) -> usize {
        self.frame_num
    }

    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }

    pub fn landmarks_mut(&mut self) -> &mut Vec<Landmark> {
        &mut self.landmarks
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Both collections at once, for stages that write to either.
    pub fn data_mut(&mut self) -> (&mut [Landmark], &mut [Frame]) {
        (&mut self.landmarks, &mut self.frames)
    }

    /// Keyframe the latest update was tracked against.
    pub fn last_keyframe(&self) -> Option<FrameId> {
        self.last_keyframe
    }

    pub fn stats(&self) -> &TrackingStats {
        &self.stats
    }

    pub fn region_grid(&self) -> &RegionGrid {
        &self.grid
    }

    pub fn occupancy(&self) -> &RegionOccupancy {
        &self.occupancy
    }

    /// Draw the track overlay onto `image`.
    pub fn visualize(&mut self, image: &mut Mat) -> anyhow::Result<()> {
        self.visualization.draw(image)
    }

    pub fn update(&mut self, frame: Frame) -> anyhow::Result<()> {
        if let Some(last) = self.frames.last() {
            anyhow::ensure!(
                frame.id() > last.id(),
                "frame {} is not newer than frame {}",
                frame.id(),
                last.id()
            );
        }
        let image_size = frame.image_size();
        self.frames.push(frame);

        if self.state == TrackingState::Uninitialized {
            if let Some(frame) = self.frames.last() {
                self.tracker.init(frame)?;
            }
            self.last_keyframe = self.tracker.last_keyframe();
            self.visualization.init(image_size, self.landmarks.len())?;
            self.state = TrackingState::Steady;
            self.frame_num += 1;
            return Ok(());
        }

        self.last_keyframe = self.tracker.last_keyframe();
        let num_frames = self.frames.len();
        let result = self
            .tracker
            .track(&mut self.landmarks, &self.frames[num_frames - 1])?;
        log::debug!(
            "frame {}: {} landmarks tracked",
            self.frames[num_frames - 1].id(),
            result.num_tracked
        );
        if result.num_tracked > 0 {
            self.reject_outliers()?;
        }

        let num_good = self.record_tracks()?;
        self.stats.frame_track_counts.push(FrameTrackCount {
            frame_num: self.frame_num,
            num_tracked: num_good,
        });

        self.prune();

        self.frames[num_frames - 2].compress_images()?;
        self.frame_num += 1;
        Ok(())
    }

    /// Drop the current observation of tracked landmarks that do not fit the
    /// epipolar geometry to the keyframe; the stereo pair is checked on its own.
    fn reject_outliers(&mut self) -> anyhow::Result<()> {
        let Some(checker) = self.checker.as_ref() else {
            return Ok(());
        };
        let (Some(keyframe), Some(frame)) = (
            self.last_keyframe.and_then(|id| frame_by_id(&self.frames, id)),
            self.frames.last(),
        ) else {
            return Ok(());
        };

        let estimate = checker.compute_essential(&self.landmarks, keyframe, frame, false)?;
        let inliers: HashSet<usize> = estimate.inliers.into_iter().collect();
        let mut dropped = 0;
        for (index, landmark) in self.landmarks.iter_mut().enumerate() {
            if landmark.is_observed_in_frame(frame.id()) && !inliers.contains(&index) {
                landmark.remove_last_observation();
                dropped += 1;
            }
        }

        if frame.has_stereo_image() {
            let estimate = checker.compute_essential(&self.landmarks, keyframe, frame, true)?;
            let inliers: HashSet<usize> = estimate.inliers.into_iter().collect();
            for (index, landmark) in self.landmarks.iter_mut().enumerate() {
                if landmark.stereo_observation_by_frame_id(frame.id()).is_some()
                    && !inliers.contains(&index)
                {
                    landmark.remove_last_stereo_observation();
                    dropped += 1;
                }
            }
        }
        log::debug!("frame {}: {dropped} outlier observations dropped", frame.id());
        Ok(())
    }

    /// Bin every observation of the current frame, collect error statistics
    /// and the overlay tracks. Returns the number of landmarks observed.
    fn record_tracks(&mut self) -> anyhow::Result<usize> {
        let num_frames = self.frames.len();
        let frame = &self.frames[num_frames - 1];
        let prev_frame_id = self.frames[num_frames - 2].id();
        let keyframe = self.last_keyframe.and_then(|id| frame_by_id(&self.frames, id));
        let (width, height) = frame.image_size();
        let camera = frame.camera_model();

        self.occupancy.reset(&self.grid);
        self.stats.track_lengths.resize(self.landmarks.len(), 0);
        self.failure_recorded.resize(self.landmarks.len(), false);
        let mut num_good = 0;
        for (i, landmark) in self.landmarks.iter().enumerate() {
            let key_obs = keyframe.and_then(|k| landmark.observation_by_frame_id(k.id()));
            let Some(obs) = landmark.observation_by_frame_id(frame.id()) else {
                // 当前帧跟踪失败; a track that is lost never comes back, so each
                // landmark is counted once, however it was lost
                let newly_failed = key_obs.is_some() && !self.failure_recorded[i];
                if newly_failed {
                    self.failure_recorded[i] = true;
                    if let Some(pixel_gnd) = project_ground_truth(frame, landmark) {
                        let (radius, _) = Utility::polar_coordinates(&pixel_gnd, width, height);
                        self.stats.failure_rad_dists.push(RadialDistance {
                            radius,
                            frame_num: self.frame_num,
                        });
                    }
                    self.stats
                        .final_track_lengths
                        .push(landmark.num_observations().saturating_sub(1));
                }
                continue;
            };

            let pixel = obs.pixel();
            if let Some(cell) = self.grid.locate_pixel(&pixel, width, height) {
                self.occupancy.insert(self.grid.cell_index(cell), i);
            }

            let prev_obs = landmark.observation_by_frame_id(prev_frame_id);
            if let (Some(key_obs), Some(keyframe)) = (key_obs, keyframe) {
                if frame.has_pose() && landmark.has_ground_truth() {
                    if let Some(pixel_gnd) = project_ground_truth(frame, landmark) {
                        let error = (pixel - pixel_gnd).norm();
                        if let Some(prev_obs) = prev_obs {
                            self.visualization.add_track_with_ground_truth(
                                &to_point(&pixel_gnd),
                                &prev_obs.keypoint(),
                                &obs.keypoint(),
                                error,
                                i,
                            )?;
                        }
                        let (radius, _) = Utility::polar_coordinates(&pixel_gnd, width, height);

                        let pixel_prev = key_obs.pixel();
                        let key_camera = keyframe.camera_model();
                        let flow = homogeneous_direction(&(pixel - pixel_prev));
                        let ray = camera.unproject_to_bearing(&pixel);
                        let ray_gnd = camera.unproject_to_bearing(&pixel_gnd);
                        let ray_prev = key_camera.unproject_to_bearing(&pixel_prev);
                        let (prev_error, flow_gnd, ray_gnd_prev) =
                            match project_ground_truth(keyframe, landmark) {
                                Some(pixel_gnd_prev) => (
                                    (pixel_prev - pixel_gnd_prev).norm(),
                                    homogeneous_direction(&(pixel_gnd - pixel_gnd_prev)),
                                    key_camera.unproject_to_bearing(&pixel_gnd_prev),
                                ),
                                None => (0.0, Vector3::z(), ray_prev),
                            };
                        let angular_error = Utility::angle_between(&flow, &flow_gnd);
                        let bearing_error = Utility::angle_between(&ray, &ray_gnd);
                        let bearing_error_prev = Utility::angle_between(&ray_prev, &ray_gnd_prev);

                        self.stats.radial_errors.push(RadialError {
                            radius,
                            error,
                            error_delta: error - prev_error,
                            angular_error,
                            bearing_error_delta: bearing_error - bearing_error_prev,
                        });
                        self.stats.frame_errors.push(FrameError {
                            track_length: landmark.num_observations().saturating_sub(1),
                            landmark_index: i,
                            radius,
                            error,
                            bearing_error,
                        });
                        self.stats.success_rad_dists.push(RadialDistance {
                            radius,
                            frame_num: self.frame_num,
                        });
                    }
                } else if let Some(prev_obs) = prev_obs {
                    self.visualization
                        .add_track(&prev_obs.keypoint(), &obs.keypoint(), i)?;
                }
            }
            self.stats.track_lengths[i] += 1;
            num_good += 1;
        }
        Ok(num_good)
    }

    /// Cap every region at `max_features_region` observations in the current
    /// frame. Returns the indices of the landmarks that lost their observation.
    pub fn prune(&mut self) -> Vec<usize> {
        let dropped = self
            .occupancy
            .prune(&mut self.landmarks, self.config.max_features_region);
        if !dropped.is_empty() {
            log::debug!("frame {}: pruned {} observations", self.frame_num, dropped.len());
        }
        dropped
    }

    /// Detect new landmarks in regions below `min_features_region`, only while
    /// the tracker is anchored on the latest frame. Returns the number added.
    pub fn redetect(&mut self) -> anyhow::Result<usize> {
        let Some(frame) = self.frames.last() else {
            return Ok(0);
        };
        if self.tracker.last_keyframe() != Some(frame.id()) {
            return Ok(0);
        }
        let (width, height) = frame.image_size();
        let imsize = width.max(height) as f64;

        let mut detected = 0;
        for index in self.occupancy.cells_below(self.config.min_features_region) {
            let bounds = self.grid.bounds(self.grid.cell_at(index), imsize);
            detected += self
                .detector
                .detect_in_radial_region(frame, &mut self.landmarks, &bounds)?;
        }
        log::debug!("frame {}: {detected} landmarks detected", frame.id());
        Ok(detected)
    }
}
