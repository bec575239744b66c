use std::sync::Arc;

use opencv::core::Mat;
use serde::Serialize;

use super::{BundleAdjuster, OdometryModule, ReconstructionModule, StereoModule, TrackingModule};
use crate::config::SlamConfig;
use crate::data::Frame;
use crate::feature::{GoodFeaturesDetector, LucasKanadeTracker};
use crate::global_types::{FrameId, IdGenerator, Pose};
use crate::odometry::{FivePoint, Pnp};
use crate::reconstruction::{StereoTriangulator, Triangulator};
use crate::utility::Utility;

/// One trajectory sample: position and unit quaternion of the camera in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoseRecord {
    pub frame_id: FrameId,
    pub time: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub qx: f64,
    pub qy: f64,
    pub qz: f64,
    pub qw: f64,
}

impl PoseRecord {
    pub fn new(frame: &Frame, pose: &Pose) -> Self {
        let t = Utility::translation(pose);
        let q = Utility::quaternion(pose);
        Self {
            frame_id: frame.id(),
            time: frame.time(),
            x: t.x,
            y: t.y,
            z: t.z,
            qx: q.i,
            qy: q.j,
            qz: q.k,
            qw: q.w,
        }
    }
}

/// Runs every stage on one frame before the next is accepted.
///
/// Order per frame: tracking, odometry, reconstruction, sliding-window
/// bundle adjustment (every `ba_sliding_interval` frames), redetection, stereo.
pub struct SlamPipeline {
    tracking: TrackingModule,
    odometry: Option<Box<dyn OdometryModule>>,
    reconstruction: Option<Box<dyn ReconstructionModule>>,
    bundle_adjuster: Option<Box<dyn BundleAdjuster>>,
    stereo: Option<Box<dyn StereoModule>>,
    ba_sliding_window: usize,
    ba_sliding_interval: usize,
    frame_num: usize,
}

impl SlamPipeline {
    pub fn new(tracking: TrackingModule) -> Self {
        Self {
            tracking,
            odometry: None,
            reconstruction: None,
            bundle_adjuster: None,
            stereo: None,
            ba_sliding_window: 0,
            ba_sliding_interval: 0,
            frame_num: 0,
        }
    }

    /// The full stack: Shi-Tomasi detection, Lucas-Kanade tracking, five point
    /// outlier rejection, PnP odometry, two-view and stereo triangulation.
    pub fn from_config(config: &SlamConfig, landmark_ids: Arc<IdGenerator>) -> anyhow::Result<Self> {
        let tracking = TrackingModule::new(
            Box::new(GoodFeaturesDetector::new(config.detector.clone(), landmark_ids)),
            Box::new(LucasKanadeTracker::new(config.tracker.clone())),
            Some(Box::new(FivePoint::new(config.five_point.clone()))),
            config.tracking.clone(),
        )?;
        if config.ba_sliding_window > 0 {
            log::warn!("no bundle adjuster available, sliding window disabled");
        }
        Ok(Self::new(tracking)
            .with_odometry(Box::new(Pnp::new(config.pnp.clone())))
            .with_reconstruction(Box::new(Triangulator::new(config.reconstruction.clone())))
            .with_stereo(Box::new(StereoTriangulator::new(
                config.reconstruction.min_triangulation_angle,
            )))
            .with_sliding_window(config.ba_sliding_window, config.ba_sliding_interval))
    }

    pub fn with_odometry(mut self, odometry: Box<dyn OdometryModule>) -> Self {
        self.odometry = Some(odometry);
        self
    }

    pub fn with_reconstruction(mut self, reconstruction: Box<dyn ReconstructionModule>) -> Self {
        self.reconstruction = Some(reconstruction);
        self
    }

    pub fn with_bundle_adjuster(mut self, bundle_adjuster: Box<dyn BundleAdjuster>) -> Self {
        self.bundle_adjuster = Some(bundle_adjuster);
        self
    }

    pub fn with_stereo(mut self, stereo: Box<dyn StereoModule>) -> Self {
        self.stereo = Some(stereo);
        self
    }

    /// Bundle adjust the last `window` frames every `interval` frames.
    pub fn with_sliding_window(mut self, window: usize, interval: usize) -> Self {
        self.ba_sliding_window = window;
        self.ba_sliding_interval = interval;
        self
    }

    pub fn tracking(&self) -> &TrackingModule {
        &self.tracking
    }

    pub fn tracking_mut(&mut self) -> &mut TrackingModule {
        &mut self.tracking
    }

    pub fn frame_num(&self) -> usize {
        self.frame_num
    }

    fn bundle_adjust_due(&self) -> bool {
        self.ba_sliding_window > 0
            && self.ba_sliding_interval > 0
            && (self.frame_num + 1) % self.ba_sliding_interval == 0
    }

    pub fn process_frame(&mut self, frame: Frame) -> anyhow::Result<()> {
        self.tracking.update(frame)?;
        let keyframe = self.tracking.last_keyframe();

        if let Some(odometry) = self.odometry.as_mut() {
            let (landmarks, frames) = self.tracking.data_mut();
            odometry.update(landmarks, frames, keyframe)?;
        }
        if let Some(reconstruction) = self.reconstruction.as_mut() {
            let (landmarks, frames) = self.tracking.data_mut();
            reconstruction.update(landmarks, frames)?;
        }
        if self.bundle_adjust_due() {
            if let Some(bundle_adjuster) = self.bundle_adjuster.as_mut() {
                let (landmarks, frames) = self.tracking.data_mut();
                // 最新帧在前
                let frame_ids: Vec<FrameId> = frames
                    .iter()
                    .rev()
                    .take(self.ba_sliding_window)
                    .map(Frame::id)
                    .collect();
                bundle_adjuster.bundle_adjust(landmarks, frames, &frame_ids)?;
            }
        }
        self.tracking.redetect()?;
        if let Some(stereo) = self.stereo.as_mut() {
            let (landmarks, frames) = self.tracking.data_mut();
            if let Some(frame) = frames.last() {
                stereo.update(frame, landmarks)?;
            }
        }
        self.frame_num += 1;
        Ok(())
    }

    pub fn visualize(&mut self, image: &mut Mat) -> anyhow::Result<()> {
        self.tracking.visualize(image)
    }

    /// Trajectory of every frame with an estimated pose. The first frame is
    /// reported at its ground-truth pose when it has no estimate, as the
    /// reference of the trajectory.
    pub fn finish(&self) -> Vec<PoseRecord> {
        let records: Vec<PoseRecord> = self
            .tracking
            .frames()
            .iter()
            .enumerate()
            .filter_map(|(i, frame)| {
                let pose = match (frame.estimated_pose(), i) {
                    (Some(pose), _) => pose,
                    (None, 0) => frame.pose()?,
                    (None, _) => return None,
                };
                Some(PoseRecord::new(frame, pose))
            })
            .collect();
        log::info!(
            "{} of {} frames with a pose",
            records.len(),
            self.tracking.frames().len()
        );
        records
    }
}
