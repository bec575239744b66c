use nalgebra::{Matrix3, Vector3, SVD};
use opencv::calib3d::FM_RANSAC;
use opencv::core::{Point2f, Vector};
use opencv::prelude::*;

use crate::config::FivePointConfig;
use crate::data::{Frame, Landmark};
use crate::global_cast::Matrix3d;

/// Relative-pose constraint between the keyframe and the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EssentialEstimate {
    /// `b_cur^T E b_key = 0`; `None` when there were too few correspondences.
    pub essential: Option<Matrix3<f64>>,
    /// Indices into the landmark list.
    pub inliers: Vec<usize>,
}

/// Epipolar outlier rejection.
pub trait OutlierChecker: Send {
    /// Essential matrix from landmarks observed in both `keyframe` and `frame`
    /// (their stereo observations in `frame` when `stereo` is set).
    fn compute_essential(
        &self,
        landmarks: &[Landmark],
        keyframe: &Frame,
        frame: &Frame,
        stereo: bool,
    ) -> anyhow::Result<EssentialEstimate>;
}

/// RANSAC essential matrix on bearing vectors.
///
/// The model is fitted with OpenCV on normalized image coordinates of the
/// forward-looking bearings; every correspondence, including rays beyond 90
/// degrees, is then classified by its angular distance to the epipolar planes.
pub struct FivePoint {
    config: FivePointConfig,
}

/// 本质矩阵估计所需的对应关系
struct Correspondence {
    index: usize,
    key: Vector3<f64>,
    cur: Vector3<f64>,
}

impl FivePoint {
    /// Rays this close to the image plane are left out of the fit.
    const MIN_FORWARD: f64 = 0.1;

    pub fn new(config: FivePointConfig) -> Self {
        Self { config }
    }

    fn correspondences(
        landmarks: &[Landmark],
        keyframe: &Frame,
        frame: &Frame,
        stereo: bool,
    ) -> Vec<Correspondence> {
        let cur_camera = if stereo {
            frame.stereo_camera_model()
        } else {
            frame.camera_model()
        };
        landmarks
            .iter()
            .enumerate()
            .filter_map(|(index, landmark)| {
                let key = landmark.observation_by_frame_id(keyframe.id())?;
                let cur = if stereo {
                    landmark.stereo_observation_by_frame_id(frame.id())?
                } else {
                    landmark.observation_by_frame_id(frame.id())?
                };
                Some(Correspondence {
                    index,
                    key: keyframe.camera_model().unproject_to_bearing(&key.pixel()),
                    cur: cur_camera.unproject_to_bearing(&cur.pixel()),
                })
            })
            .collect()
    }

    /// Closest essential matrix: equal non-zero singular values.
    fn project_to_essential(matrix: &Matrix3<f64>) -> Option<Matrix3<f64>> {
        let svd = SVD::new(*matrix, true, true);
        let (u, v_t) = (svd.u?, svd.v_t?);
        let s = 0.5 * (svd.singular_values[0] + svd.singular_values[1]);
        if s <= f64::EPSILON {
            return None;
        }
        let sigma = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 0.0));
        Some(u * sigma * v_t)
    }

    /// Sine of the larger angle between a ray and its epipolar plane.
    fn epipolar_error(essential: &Matrix3<f64>, key: &Vector3<f64>, cur: &Vector3<f64>) -> f64 {
        let plane_cur = essential * key;
        let plane_key = essential.transpose() * cur;
        let err_cur = cur.normalize().dot(&plane_cur).abs() / plane_cur.norm().max(f64::EPSILON);
        let err_key = key.normalize().dot(&plane_key).abs() / plane_key.norm().max(f64::EPSILON);
        err_cur.max(err_key)
    }
}

impl OutlierChecker for FivePoint {
    fn compute_essential(
        &self,
        landmarks: &[Landmark],
        keyframe: &Frame,
        frame: &Frame,
        stereo: bool,
    ) -> anyhow::Result<EssentialEstimate> {
        let matches = Self::correspondences(landmarks, keyframe, frame, stereo);
        let all = || matches.iter().map(|c| c.index).collect::<Vec<_>>();

        let forward: Vec<&Correspondence> = matches
            .iter()
            .filter(|c| c.key.z > Self::MIN_FORWARD && c.cur.z > Self::MIN_FORWARD)
            .collect();
        if forward.len() < self.config.min_correspondences.max(8) {
            log::warn!(
                "frame {}: {} correspondences with keyframe {}, skipping outlier check",
                frame.id(),
                forward.len(),
                keyframe.id()
            );
            return Ok(EssentialEstimate {
                essential: None,
                inliers: all(),
            });
        }

        let to_plane = |b: &Vector3<f64>| Point2f::new((b.x / b.z) as f32, (b.y / b.z) as f32);
        let ll: Vector<Point2f> = forward.iter().map(|c| to_plane(&c.key)).collect();
        let rr: Vector<Point2f> = forward.iter().map(|c| to_plane(&c.cur)).collect();
        let focal = 0.5 * (keyframe.camera_model().focal_length() + frame.camera_model().focal_length());
        let threshold = self.config.ransac_threshold / focal;

        let mut mask = Vector::<u8>::default();
        let fund_mat = opencv::calib3d::find_fundamental_mat_1(
            &ll,
            &rr,
            FM_RANSAC,
            threshold,
            self.config.confidence,
            &mut mask,
        )?;
        if fund_mat.rows() != 3 || fund_mat.cols() != 3 {
            log::warn!("frame {}: essential matrix estimation failed", frame.id());
            return Ok(EssentialEstimate {
                essential: None,
                inliers: all(),
            });
        }
        let Some(essential) = Self::project_to_essential(&Matrix3d::try_from(&fund_mat)?.0) else {
            return Ok(EssentialEstimate {
                essential: None,
                inliers: all(),
            });
        };

        let inliers: Vec<usize> = matches
            .iter()
            .filter(|c| Self::epipolar_error(&essential, &c.key, &c.cur) <= threshold)
            .map(|c| c.index)
            .collect();
        log::debug!(
            "frame {}{}: {}/{} epipolar inliers",
            frame.id(),
            if stereo { " (stereo)" } else { "" },
            inliers.len(),
            matches.len()
        );
        Ok(EssentialEstimate {
            essential: Some(essential),
            inliers,
        })
    }
}
