//! 数据集处理
//!
//! EuRoC Dataset  https://paperswithcode.com/dataset/euroc-mav
mod euroc;

use std::path::{Path, PathBuf};

use crate::global_types::{Pose, Timestamp};

pub use euroc::EuRoCDataset;
pub type DefaultDataset = euroc::EuRoCDataset;

pub trait DatasetTrait {
    /// 读取图像列表
    /// 返回时间戳和图像路径
    fn read_t_cam0_list(&self) -> &[(Timestamp, PathBuf)];
    /// Stereo image taken at the same timestamp as a primary image.
    fn stereo_image_path(&self, timestamp: Timestamp) -> Option<&Path>;
    /// Ground-truth camera-to-world pose of the primary camera.
    fn ground_truth_pose(&self, timestamp: Timestamp) -> Option<Pose>;
    /// Stereo camera in the primary camera frame.
    fn stereo_pose(&self) -> Option<Pose>;
}
