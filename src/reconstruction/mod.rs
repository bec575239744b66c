//! Landmark positions from multiple views.

mod stereo;
mod triangulator;

pub use stereo::StereoTriangulator;
pub use triangulator::Triangulator;

use nalgebra::{Matrix4, RowVector4, Vector3, SVD};

use crate::global_types::Pose;
use crate::utility::Utility;

/// Linear (DLT) triangulation of two bearing rays.
///
/// `inv_pose_*` map world points into each camera. The usual image-point rows
/// `x * P_3 - P_1` are scaled by the ray's z so rays at or beyond 90 degrees
/// still constrain the point.
pub fn triangulate_point(
    bearing_i: &Vector3<f64>,
    bearing_j: &Vector3<f64>,
    inv_pose_i: &Pose,
    inv_pose_j: &Pose,
) -> Option<Vector3<f64>> {
    let rows = |b: &Vector3<f64>, p: &Pose| -> [RowVector4<f64>; 2] {
        [
            b.x * p.row(2) - b.z * p.row(0),
            b.y * p.row(2) - b.z * p.row(1),
        ]
    };
    let [row0, row1] = rows(bearing_i, inv_pose_i);
    let [row2, row3] = rows(bearing_j, inv_pose_j);
    let design_matrix = Matrix4::<f64>::from_rows(&[row0, row1, row2, row3]);

    let v = SVD::new(design_matrix, false, true).v_t?.transpose();
    let tri_pt = v.column(3);
    if tri_pt[3].abs() < 1e-12 {
        return None;
    }
    let point = Vector3::new(tri_pt[0], tri_pt[1], tri_pt[2]) / tri_pt[3];

    // in front of both cameras
    let in_front = |b: &Vector3<f64>, p: &Pose| Utility::transform_point(p, &point).dot(b) > 0.0;
    (in_front(bearing_i, inv_pose_i) && in_front(bearing_j, inv_pose_j)).then_some(point)
}

/// Angle at `point` between the two camera centers, in degrees.
pub fn triangulation_angle(point: &Vector3<f64>, pose_i: &Pose, pose_j: &Pose) -> f64 {
    let ray_i = Utility::translation(pose_i) - point;
    let ray_j = Utility::translation(pose_j) - point;
    Utility::angle_between(&ray_i, &ray_j).to_degrees()
}
