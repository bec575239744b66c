use nalgebra::{Vector2, Vector3};
use opencv::core::Point2f;

use crate::data::Frame;
use crate::global_types::{FrameId, LandmarkId};

/// One 2D observation of a landmark in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    frame_id: FrameId,
    keypoint: Point2f,
}

impl Feature {
    pub fn new(frame_id: FrameId, keypoint: Point2f) -> Self {
        Self { frame_id, keypoint }
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn keypoint(&self) -> Point2f {
        self.keypoint
    }

    #[inline]
    pub fn pixel(&self) -> Vector2<f64> {
        Vector2::new(self.keypoint.x as f64, self.keypoint.y as f64)
    }
}

/// A tracked 3D feature candidate and its per-frame observation history.
///
/// Observations are kept sorted by frame ID with at most one entry per frame,
/// so lookups by frame are a binary search. Only the most recent observation can
/// be removed. A landmark is never deleted: once it stops being observed it stays
/// in the ledger for statistics and output.
#[derive(Debug, Clone, Default)]
pub struct Landmark {
    id: LandmarkId,
    observations: Vec<Feature>,
    stereo_observations: Vec<Feature>,
    ground_truth: Option<Vector3<f64>>,
    estimated_position: Option<Vector3<f64>>,
}

impl Landmark {
    pub fn new(id: LandmarkId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    pub fn with_ground_truth(id: LandmarkId, ground_truth: Vector3<f64>) -> Self {
        Self {
            id,
            ground_truth: Some(ground_truth),
            ..Default::default()
        }
    }

    pub fn id(&self) -> LandmarkId {
        self.id
    }

    /// Append an observation. Fails, leaving the landmark untouched, unless the
    /// feature's frame is newer than every frame already observed.
    pub fn add_observation(&mut self, feature: Feature) -> anyhow::Result<()> {
        Self::push_ordered(&mut self.observations, feature, self.id)
    }

    pub fn add_stereo_observation(&mut self, feature: Feature) -> anyhow::Result<()> {
        Self::push_ordered(&mut self.stereo_observations, feature, self.id)
    }

    fn push_ordered(
        features: &mut Vec<Feature>,
        feature: Feature,
        id: LandmarkId,
    ) -> anyhow::Result<()> {
        if let Some(last) = features.last() {
            anyhow::ensure!(
                feature.frame_id > last.frame_id,
                "landmark {id}: observation for frame {} after frame {}",
                feature.frame_id,
                last.frame_id
            );
        }
        features.push(feature);
        Ok(())
    }

    #[inline]
    fn find(features: &[Feature], frame_id: FrameId) -> Option<&Feature> {
        features
            .binary_search_by_key(&frame_id, |f| f.frame_id)
            .ok()
            .map(|index| &features[index])
    }

    pub fn observation_by_frame_id(&self, frame_id: FrameId) -> Option<&Feature> {
        Self::find(&self.observations, frame_id)
    }

    pub fn stereo_observation_by_frame_id(&self, frame_id: FrameId) -> Option<&Feature> {
        Self::find(&self.stereo_observations, frame_id)
    }

    #[inline]
    pub fn is_observed_in_frame(&self, frame_id: FrameId) -> bool {
        self.observation_by_frame_id(frame_id).is_some()
    }

    pub fn observations(&self) -> &[Feature] {
        &self.observations
    }

    pub fn stereo_observations(&self) -> &[Feature] {
        &self.stereo_observations
    }

    pub fn first_observation(&self) -> Option<&Feature> {
        self.observations.first()
    }

    pub fn last_observation(&self) -> Option<&Feature> {
        self.observations.last()
    }

    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }

    pub fn num_stereo_observations(&self) -> usize {
        self.stereo_observations.len()
    }

    /// Drop the most recent observation (failed or pruned track).
    pub fn remove_last_observation(&mut self) -> Option<Feature> {
        self.observations.pop()
    }

    pub fn remove_last_stereo_observation(&mut self) -> Option<Feature> {
        self.stereo_observations.pop()
    }

    pub fn has_ground_truth(&self) -> bool {
        self.ground_truth.is_some()
    }

    pub fn ground_truth(&self) -> Option<&Vector3<f64>> {
        self.ground_truth.as_ref()
    }

    pub fn set_ground_truth(&mut self, ground_truth: Vector3<f64>) {
        self.ground_truth = Some(ground_truth);
    }

    pub fn has_estimated_position(&self) -> bool {
        self.estimated_position.is_some()
    }

    /// Reconstructed world position, written by reconstruction or stereo.
    pub fn estimated_position(&self) -> Option<&Vector3<f64>> {
        self.estimated_position.as_ref()
    }

    pub fn set_estimated_position(&mut self, position: Vector3<f64>) {
        self.estimated_position = Some(position);
    }

    /// Whether this landmark contributed to the frame's estimated pose.
    pub fn is_estimated_for(&self, frame: &Frame) -> bool {
        frame.is_estimated_by_landmark(self.id)
    }
}
