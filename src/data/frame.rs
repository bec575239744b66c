use std::collections::HashSet;
use std::sync::Arc;

use opencv::core::{Mat, Scalar, Vector, CV_16U, CV_8U};
use opencv::imgcodecs;
use opencv::prelude::*;

use crate::camera::CameraModel;
use crate::global_types::{FrameId, IdGenerator, LandmarkId, Pose};
use crate::utility::Utility;

/// Byte-buffer form of an image while its frame is compressed.
#[derive(Debug, Clone)]
enum CompressedImage {
    /// 8/16 bit images with 1, 3 or 4 channels (lossless PNG).
    Png(Vector<u8>),
    /// Anything PNG cannot hold losslessly, e.g. float depth.
    Raw {
        rows: i32,
        cols: i32,
        typ: i32,
        bytes: Vec<u8>,
    },
}

impl CompressedImage {
    fn encode(image: &Mat) -> anyhow::Result<Self> {
        let depth = image.depth();
        let channels = image.channels();
        if (depth == CV_8U || depth == CV_16U) && matches!(channels, 1 | 3 | 4) {
            let mut buf = Vector::<u8>::new();
            let ok = imgcodecs::imencode(".png", image, &mut buf, &Vector::new())?;
            anyhow::ensure!(ok, "png encoding failed");
            return Ok(Self::Png(buf));
        }
        let continuous = if image.is_continuous() {
            None
        } else {
            Some(image.try_clone()?)
        };
        let bytes = continuous.as_ref().unwrap_or(image).data_bytes()?.to_vec();
        Ok(Self::Raw {
            rows: image.rows(),
            cols: image.cols(),
            typ: image.typ(),
            bytes,
        })
    }

    fn decode(&self) -> anyhow::Result<Mat> {
        match self {
            Self::Png(buf) => Ok(imgcodecs::imdecode(buf, imgcodecs::IMREAD_UNCHANGED)?),
            Self::Raw {
                rows,
                cols,
                typ,
                bytes,
            } => {
                let mut image =
                    Mat::new_rows_cols_with_default(*rows, *cols, *typ, Scalar::all(0.0))?;
                image.data_bytes_mut()?.copy_from_slice(bytes);
                Ok(image)
            }
        }
    }
}

/// One camera sample.
///
/// Frames are owned by the tracking module in an append-only sequence and
/// referred to by [FrameId] everywhere else.
pub struct Frame {
    id: FrameId,
    image: Mat,
    depth_image: Option<Mat>,
    stereo_image: Option<Mat>,
    image_comp: Option<CompressedImage>,
    depth_image_comp: Option<CompressedImage>,
    stereo_image_comp: Option<CompressedImage>,
    /// (width, height), kept so callers need not decompress for it
    image_size: (i32, i32),

    pose: Option<Pose>,
    inv_pose: Option<Pose>,
    stereo_pose: Option<Pose>,
    pose_estimate: Option<Pose>,
    inv_pose_estimate: Option<Pose>,
    /// 估计位姿时使用的路标点
    est_landmark_ids: HashSet<LandmarkId>,

    time_sec: f64,
    camera_model: Arc<dyn CameraModel>,
    stereo_camera_model: Option<Arc<dyn CameraModel>>,

    is_compressed: bool,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("time", &self.time_sec)
            .field("image_size", &self.image_size)
            .field("has_pose", &self.has_pose())
            .field("has_depth", &self.has_depth_image())
            .field("has_stereo", &self.has_stereo_image())
            .field("has_estimate", &self.has_estimated_pose())
            .field("is_compressed", &self.is_compressed)
            .finish()
    }
}

/// Assembles a [Frame] from whatever a capture source provides.
pub struct FrameBuilder {
    image: Mat,
    time_sec: f64,
    camera_model: Arc<dyn CameraModel>,
    depth_image: Option<Mat>,
    stereo: Option<(Mat, Pose, Arc<dyn CameraModel>)>,
    pose: Option<Pose>,
}

impl FrameBuilder {
    pub fn pose(mut self, pose: Pose) -> Self {
        self.pose = Some(pose);
        self
    }

    pub fn depth_image(mut self, depth_image: Mat) -> Self {
        self.depth_image = Some(depth_image);
        self
    }

    /// Stereo image with the pose of the stereo camera relative to the primary one.
    pub fn stereo(
        mut self,
        stereo_image: Mat,
        stereo_pose: Pose,
        stereo_camera_model: Arc<dyn CameraModel>,
    ) -> Self {
        self.stereo = Some((stereo_image, stereo_pose, stereo_camera_model));
        self
    }

    /// Consumes the next ID from `ids`.
    pub fn build(self, ids: &IdGenerator) -> Frame {
        let image_size = (self.image.cols(), self.image.rows());
        let (stereo_image, stereo_pose, stereo_camera_model) = match self.stereo {
            Some((image, pose, camera)) => (Some(image), Some(pose), Some(camera)),
            None => (None, None, None),
        };
        Frame {
            id: ids.next_id(),
            image: self.image,
            depth_image: self.depth_image,
            stereo_image,
            image_comp: None,
            depth_image_comp: None,
            stereo_image_comp: None,
            image_size,
            inv_pose: self.pose.as_ref().map(Utility::invert_pose),
            pose: self.pose,
            stereo_pose,
            pose_estimate: None,
            inv_pose_estimate: None,
            est_landmark_ids: HashSet::new(),
            time_sec: self.time_sec,
            camera_model: self.camera_model,
            stereo_camera_model,
            is_compressed: false,
        }
    }
}

impl Frame {
    /// Minimum a frame needs: an image, its capture time and a camera model.
    pub fn builder(image: Mat, time_sec: f64, camera_model: Arc<dyn CameraModel>) -> FrameBuilder {
        FrameBuilder {
            image,
            time_sec,
            camera_model,
            depth_image: None,
            stereo: None,
            pose: None,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn time(&self) -> f64 {
        self.time_sec
    }

    /// `(width, height)` of the primary image, valid while compressed.
    pub fn image_size(&self) -> (i32, i32) {
        self.image_size
    }

    /// Ground-truth camera-to-world pose.
    pub fn pose(&self) -> Option<&Pose> {
        self.pose.as_ref()
    }

    /// Ground-truth world-to-camera transform.
    pub fn inverse_pose(&self) -> Option<&Pose> {
        self.inv_pose.as_ref()
    }

    /// Stereo camera pose in the primary camera frame (stereo-to-primary).
    pub fn stereo_pose(&self) -> Option<&Pose> {
        self.stereo_pose.as_ref()
    }

    pub fn estimated_pose(&self) -> Option<&Pose> {
        self.pose_estimate.as_ref()
    }

    pub fn estimated_inverse_pose(&self) -> Option<&Pose> {
        self.inv_pose_estimate.as_ref()
    }

    pub fn camera_model(&self) -> &dyn CameraModel {
        self.camera_model.as_ref()
    }

    /// Falls back to the primary model when no stereo model was supplied.
    pub fn stereo_camera_model(&self) -> &dyn CameraModel {
        self.stereo_camera_model
            .as_deref()
            .unwrap_or(self.camera_model.as_ref())
    }

    /// Primary image. Empty while the frame is compressed.
    pub fn image(&self) -> &Mat {
        &self.image
    }

    pub fn depth_image(&self) -> Option<&Mat> {
        self.depth_image.as_ref()
    }

    pub fn stereo_image(&self) -> Option<&Mat> {
        self.stereo_image.as_ref()
    }

    pub fn has_pose(&self) -> bool {
        self.pose.is_some()
    }

    pub fn has_depth_image(&self) -> bool {
        self.depth_image.is_some() || self.depth_image_comp.is_some()
    }

    pub fn has_stereo_image(&self) -> bool {
        self.stereo_image.is_some() || self.stereo_image_comp.is_some()
    }

    pub fn has_estimated_pose(&self) -> bool {
        self.pose_estimate.is_some()
    }

    pub fn is_estimated_by_landmark(&self, landmark_id: LandmarkId) -> bool {
        self.est_landmark_ids.contains(&landmark_id)
    }

    pub fn set_estimated_pose(&mut self, pose: Pose) {
        self.inv_pose_estimate = Some(Utility::invert_pose(&pose));
        self.pose_estimate = Some(pose);
    }

    /// Record an estimate and the landmarks that produced it, replacing any
    /// earlier attribution.
    pub fn set_estimated_pose_with_landmarks(&mut self, pose: Pose, landmark_ids: &[LandmarkId]) {
        self.set_estimated_pose(pose);
        self.est_landmark_ids = landmark_ids.iter().copied().collect();
    }

    pub fn set_estimated_inverse_pose(&mut self, inv_pose: Pose) {
        self.pose_estimate = Some(Utility::invert_pose(&inv_pose));
        self.inv_pose_estimate = Some(inv_pose);
    }

    pub fn set_estimated_inverse_pose_with_landmarks(
        &mut self,
        inv_pose: Pose,
        landmark_ids: &[LandmarkId],
    ) {
        self.set_estimated_inverse_pose(inv_pose);
        self.est_landmark_ids = landmark_ids.iter().copied().collect();
    }

    /// Encode all held images into byte buffers and release the pixel data.
    pub fn compress_images(&mut self) -> anyhow::Result<()> {
        if self.is_compressed {
            return Ok(());
        }
        self.image_comp = Some(CompressedImage::encode(&self.image)?);
        self.depth_image_comp = self
            .depth_image
            .as_ref()
            .map(CompressedImage::encode)
            .transpose()?;
        self.stereo_image_comp = self
            .stereo_image
            .as_ref()
            .map(CompressedImage::encode)
            .transpose()?;
        self.image = Mat::default();
        self.depth_image = None;
        self.stereo_image = None;
        self.is_compressed = true;
        Ok(())
    }

    pub fn decompress_images(&mut self) -> anyhow::Result<()> {
        if !self.is_compressed {
            return Ok(());
        }
        if let Some(comp) = self.image_comp.take() {
            self.image = comp.decode()?;
        }
        if let Some(comp) = self.depth_image_comp.take() {
            self.depth_image = Some(comp.decode()?);
        }
        if let Some(comp) = self.stereo_image_comp.take() {
            self.stereo_image = Some(comp.decode()?);
        }
        self.is_compressed = false;
        Ok(())
    }

    pub fn is_compressed(&self) -> bool {
        self.is_compressed
    }
}
