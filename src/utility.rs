use nalgebra::{Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector2, Vector3};

use crate::global_types::Pose;

pub struct Utility {}

impl Utility {
    /// Polynomial `atan2` approximation, max error about 1e-3 rad, range `[-pi, pi]`.
    #[inline]
    pub fn fast_atan2(y: f64, x: f64) -> f64 {
        let ax = x.abs();
        let ay = y.abs();
        if ax == 0.0 && ay == 0.0 {
            return 0.0;
        }
        let a = ax.min(ay) / ax.max(ay);
        let s = a * a;
        let mut r = ((-0.046_496_474_9 * s + 0.159_314_22) * s - 0.327_622_764) * s * a + a;
        if ay > ax {
            r = std::f64::consts::FRAC_PI_2 - r;
        }
        if x < 0.0 {
            r = std::f64::consts::PI - r;
        }
        if y < 0.0 {
            r = -r;
        }
        r
    }

    /// Polar coordinates `(r, theta)` of a pixel relative to the image center.
    /// `r` is normalized by `max(width, height)`.
    #[inline]
    pub fn polar_coordinates(pixel: &Vector2<f64>, width: i32, height: i32) -> (f64, f64) {
        let imsize = width.max(height) as f64;
        let x = pixel.x - width as f64 / 2.0 + 0.5;
        let y = pixel.y - height as f64 / 2.0 + 0.5;
        ((x * x + y * y).sqrt() / imsize, Self::fast_atan2(y, x))
    }

    #[inline]
    pub fn rotation(pose: &Pose) -> Matrix3<f64> {
        pose.fixed_view::<3, 3>(0, 0).into_owned()
    }

    #[inline]
    pub fn translation(pose: &Pose) -> Vector3<f64> {
        pose.fixed_view::<3, 1>(0, 3).into_owned()
    }

    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Pose {
        let mut pose = Pose::zeros();
        pose.fixed_view_mut::<3, 3>(0, 0).copy_from(rotation);
        pose.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
        pose
    }

    pub fn identity_pose() -> Pose {
        Self::from_parts(&Matrix3::identity(), &Vector3::zeros())
    }

    /// `[R | t]^-1 = [R^T | -R^T t]`
    pub fn invert_pose(pose: &Pose) -> Pose {
        let rot_t = Self::rotation(pose).transpose();
        let trans = -(rot_t * Self::translation(pose));
        Self::from_parts(&rot_t, &trans)
    }

    #[inline]
    pub fn transform_point(pose: &Pose, point: &Vector3<f64>) -> Vector3<f64> {
        Self::rotation(pose) * point + Self::translation(pose)
    }

    /// `a * b`
    pub fn compose(a: &Pose, b: &Pose) -> Pose {
        let rot = Self::rotation(a) * Self::rotation(b);
        let trans = Self::rotation(a) * Self::translation(b) + Self::translation(a);
        Self::from_parts(&rot, &trans)
    }

    /// Rotation block of the pose as a normalized quaternion.
    pub fn quaternion(pose: &Pose) -> UnitQuaternion<f64> {
        let rot = Rotation3::from_matrix_unchecked(Self::rotation(pose));
        let q: Quaternion<f64> = UnitQuaternion::from_rotation_matrix(&rot).into_inner();
        UnitQuaternion::new_normalize(q)
    }

    /// Pose from a translation and a quaternion `(w, x, y, z)`.
    pub fn pose_from_quaternion(translation: &Vector3<f64>, q: &Quaternion<f64>) -> Pose {
        let rot = UnitQuaternion::new_normalize(*q).to_rotation_matrix();
        Self::from_parts(rot.matrix(), translation)
    }

    /// Angle between two rays, clamped so rounding never yields NaN.
    #[inline]
    pub fn angle_between(a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
        let denom = a.norm() * b.norm();
        if denom == 0.0 {
            return 0.0;
        }
        (a.dot(b) / denom).clamp(-1.0, 1.0).acos()
    }
}

#[cfg(test)]
mod tests {
    use super::Utility;
    use nalgebra::{Rotation3, Vector2, Vector3};

    #[test]
    fn test_fast_atan2_close_to_atan2() {
        for i in 0..360 {
            let a = (i as f64).to_radians() - std::f64::consts::PI;
            for r in [0.5, 3.0, 100.0] {
                let (y, x) = (r * a.sin(), r * a.cos());
                let err = (Utility::fast_atan2(y, x) - y.atan2(x)).abs();
                // atan2 of (−0, −x) may land on either side of the cut
                let err = err.min((err - 2.0 * std::f64::consts::PI).abs());
                assert!(err < 0.01, "angle {a}: error {err}");
            }
        }
        assert_eq!(Utility::fast_atan2(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_polar_coordinates_center_is_origin() {
        let (r, _) = Utility::polar_coordinates(&Vector2::new(49.5, 49.5), 100, 100);
        assert!(r.abs() < 1e-12);
        let (r, t) = Utility::polar_coordinates(&Vector2::new(79.5, 49.5), 100, 100);
        assert!((r - 0.3).abs() < 1e-12);
        assert!(t.abs() < 1e-3);
    }

    #[test]
    fn test_invert_and_compose() {
        let rot = Rotation3::from_euler_angles(0.1, -0.4, 0.7);
        let pose = Utility::from_parts(rot.matrix(), &Vector3::new(1.0, -2.0, 0.5));
        let inv = Utility::invert_pose(&pose);
        let ident = Utility::compose(&pose, &inv);
        assert!((ident - Utility::identity_pose()).norm() < 1e-12);

        let p = Vector3::new(0.3, 0.2, 5.0);
        let back = Utility::transform_point(&inv, &Utility::transform_point(&pose, &p));
        assert!((back - p).norm() < 1e-12);
    }

    #[test]
    fn test_quaternion_is_unit() {
        let rot = Rotation3::from_euler_angles(0.3, 0.2, -1.1);
        let pose = Utility::from_parts(rot.matrix(), &Vector3::zeros());
        let q = Utility::quaternion(&pose);
        assert!((q.into_inner().norm() - 1.0).abs() < 1e-12);
        assert!((q.to_rotation_matrix().matrix() - rot.matrix()).norm() < 1e-9);

        let back = Utility::pose_from_quaternion(&Vector3::zeros(), &q.into_inner());
        assert!((back - pose).norm() < 1e-9);
    }
}
