//! Tuning parameters.
//!
//! The constants are the defaults; every struct deserializes with
//! `#[serde(default)]`, so a JSON file only needs the fields it changes.

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// 每个区域最多保留的特征点数
pub const MAX_FEATURES_REGION: usize = 5;
/// 每个区域少于该数量时重新检测
pub const MIN_FEATURES_REGION: usize = 2;
pub const MIN_DIST: i32 = 30;
/// 反向光流，然后匹配正向光流，进行特征点筛选。
pub const FLOW_BACK: bool = true;
/// 窗口大小
pub const WINDOW_SIZE: i32 = 21;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub min_features_region: usize,
    pub max_features_region: usize,
    /// Radial breakpoints, normalized by the larger image side.
    pub radial_bins: Vec<f64>,
    /// Number of equal angular sectors over `[-pi, pi]`.
    pub angular_bins: usize,
    /// Decay of the trail overlay per drawn frame.
    pub track_fade: f64,
    pub track_opacity: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            min_features_region: MIN_FEATURES_REGION,
            max_features_region: MAX_FEATURES_REGION,
            radial_bins: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7],
            angular_bins: 8,
            track_fade: 0.99,
            track_opacity: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub window_size: i32,
    pub pyramid_levels: i32,
    /// A new keyframe every this many frames (0 disables).
    pub keyframe_interval: usize,
    /// A new keyframe once fewer than this share of the keyframe's tracks survive.
    pub min_tracked_ratio: f64,
    pub flow_back: bool,
    pub max_flow_back_error: f32,
    pub border_size: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_size: WINDOW_SIZE,
            pyramid_levels: 3,
            keyframe_interval: 1,
            min_tracked_ratio: 0.0,
            flow_back: FLOW_BACK,
            max_flow_back_error: 0.5,
            border_size: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub max_features_per_region: i32,
    pub quality_level: f64,
    pub min_distance: i32,
    pub block_size: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_features_per_region: 10,
            quality_level: 0.01,
            min_distance: MIN_DIST,
            block_size: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FivePointConfig {
    /// Pixels; divided by the focal length before use.
    pub ransac_threshold: f64,
    pub confidence: f64,
    pub min_correspondences: usize,
}

impl Default for FivePointConfig {
    fn default() -> Self {
        Self {
            ransac_threshold: 1.0,
            confidence: 0.99,
            min_correspondences: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Pixels, 0 disables the check.
    pub max_reprojection_error: f64,
    /// Degrees.
    pub min_triangulation_angle: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            max_reprojection_error: 0.0,
            min_triangulation_angle: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpConfig {
    /// Pixels.
    pub reprojection_threshold: f32,
    pub iterations: i32,
    pub confidence: f64,
    pub min_landmarks: usize,
}

impl Default for PnpConfig {
    fn default() -> Self {
        Self {
            reprojection_threshold: 2.0,
            iterations: 100,
            confidence: 0.99,
            min_landmarks: 6,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlamConfig {
    pub tracking: TrackingConfig,
    pub tracker: TrackerConfig,
    pub detector: DetectorConfig,
    pub five_point: FivePointConfig,
    pub reconstruction: ReconstructionConfig,
    pub pnp: PnpConfig,
    /// Frames in the sliding bundle adjustment window (0 disables).
    pub ba_sliding_window: usize,
    /// Bundle adjust every this many frames (0 disables).
    pub ba_sliding_interval: usize,
}

impl SlamConfig {
    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("cannot open config {}", path.display()))?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        log::info!("config loaded from {}", path.display());
        Ok(config)
    }
}
