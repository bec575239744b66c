//! Per-frame processing stages and the pipeline that sequences them.
//!
//! Every stage borrows the landmark ledger and the frame sequence for the
//! duration of one call only; both are owned by the [TrackingModule].

mod slam_module;
mod tracking_module;
mod visualization;

pub use slam_module::{PoseRecord, SlamPipeline};
pub use tracking_module::{
    FrameError, FrameTrackCount, RadialDistance, RadialError, TrackingModule, TrackingState,
    TrackingStats,
};
pub use visualization::Visualization;

use crate::data::{Frame, Landmark};
use crate::global_types::FrameId;

/// Estimates the pose of the latest frame.
pub trait OdometryModule: Send {
    /// `frames` ends with the frame to estimate; `keyframe` is the tracker's
    /// anchor for it.
    fn update(
        &mut self,
        landmarks: &mut [Landmark],
        frames: &mut [Frame],
        keyframe: Option<FrameId>,
    ) -> anyhow::Result<()>;
}

/// Estimates landmark positions from frames with estimated poses.
pub trait ReconstructionModule: Send {
    /// Returns the number of landmarks (re)positioned.
    fn update(&mut self, landmarks: &mut [Landmark], frames: &[Frame]) -> anyhow::Result<usize>;
}

/// Joint refinement of poses and landmark positions.
pub trait BundleAdjuster: Send {
    /// Refine the frames listed in `frame_ids` and the landmarks they observe.
    fn bundle_adjust(
        &mut self,
        landmarks: &mut [Landmark],
        frames: &mut [Frame],
        frame_ids: &[FrameId],
    ) -> anyhow::Result<()>;
}

/// Uses the stereo pair of a frame to position landmarks.
pub trait StereoModule: Send {
    /// Returns the number of landmarks positioned.
    fn update(&mut self, frame: &Frame, landmarks: &mut [Landmark]) -> anyhow::Result<usize>;
}
