use anyhow::Context;
use nalgebra::{Vector2, Vector3};
use opencv::core::{FileNodeTraitConst, FileStorageTrait, FileStorageTraitConst};

use super::{CameraModel, CameraParametersTrait, CameraType};

#[derive(Debug, Default, Clone)]
pub struct DoubleSphereParameters {
    pub camera_name: String,
    // size
    pub image_width: i32,
    pub image_height: i32,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// distance between the two unit sphere centers
    pub xi: f64,
    pub alpha: f64,
}

impl CameraParametersTrait for DoubleSphereParameters {
    const CAMERA_TYPE: &'static str = "DOUBLE_SPHERE";

    fn read_from_yaml(path: &str) -> anyhow::Result<Self> {
        let fs = opencv::core::FileStorage::new(
            path,
            opencv::core::FileStorage_Mode::READ as i32,
            "utf-8",
        )?;
        anyhow::ensure!(fs.is_opened()?, "cannot open camera file {path}");

        let model_type = fs.get("model_type")?.to_string()?;
        anyhow::ensure!(
            model_type == Self::CAMERA_TYPE,
            "model type {model_type} is not double sphere"
        );
        let projection_parameters = fs
            .get("projection_parameters")
            .context("missing projection_parameters")?;
        Ok(Self {
            camera_name: fs.get("camera_name")?.to_string()?,
            image_width: fs.get("image_width")?.to_i32()?,
            image_height: fs.get("image_height")?.to_i32()?,
            fx: projection_parameters.get("fx")?.to_f64()?,
            fy: projection_parameters.get("fy")?.to_f64()?,
            cx: projection_parameters.get("cx")?.to_f64()?,
            cy: projection_parameters.get("cy")?.to_f64()?,
            xi: projection_parameters.get("xi")?.to_f64()?,
            alpha: projection_parameters.get("alpha")?.to_f64()?,
        })
    }

    fn write_to_yaml(&self, path: &str) -> anyhow::Result<()> {
        let mut fs = opencv::core::FileStorage::new(
            path,
            opencv::core::FileStorage_Mode::WRITE as i32,
            "utf-8",
        )?;
        fs.write_str("model_type", Self::CAMERA_TYPE)?;
        fs.write_str("camera_name", &self.camera_name)?;
        fs.write_i32("image_width", self.image_width)?;
        fs.write_i32("image_height", self.image_height)?;
        fs.start_write_struct("projection_parameters", opencv::core::FileNode_MAP, "")?;
        fs.write_f64("fx", self.fx)?;
        fs.write_f64("fy", self.fy)?;
        fs.write_f64("cx", self.cx)?;
        fs.write_f64("cy", self.cy)?;
        fs.write_f64("xi", self.xi)?;
        fs.write_f64("alpha", self.alpha)?;
        fs.end_write_struct()?;
        fs.release()?;
        Ok(())
    }
}

/// Omnidirectional camera following the double sphere model
/// (Usenko, Demmel, Cremers 2018).
#[derive(Debug, Default, Clone)]
pub struct DoubleSphereCamera {
    pub parameters: DoubleSphereParameters,
    // projection validity: z > -w2 * |p|
    w2: f64,
}

impl DoubleSphereCamera {
    pub fn new(parameters: DoubleSphereParameters) -> Self {
        let alpha = parameters.alpha;
        let xi = parameters.xi;
        let w1 = if alpha <= 0.5 {
            alpha / (1.0 - alpha)
        } else {
            (1.0 - alpha) / alpha
        };
        let w2 = (w1 + xi) / (2.0 * w1 * xi + xi * xi + 1.0).sqrt();
        Self { parameters, w2 }
    }

    pub fn from_yaml(camera_file: &str) -> anyhow::Result<Self> {
        Ok(Self::new(DoubleSphereParameters::read_from_yaml(camera_file)?))
    }
}

impl CameraModel for DoubleSphereCamera {
    fn project_to_image(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        let p = &self.parameters;
        let (x, y, z) = (point.x, point.y, point.z);
        let d1 = point.norm();
        if d1 == 0.0 || z <= -self.w2 * d1 {
            return None;
        }
        let zeta = p.xi * d1 + z;
        let d2 = (x * x + y * y + zeta * zeta).sqrt();
        let denom = p.alpha * d2 + (1.0 - p.alpha) * zeta;
        if denom <= 0.0 {
            return None;
        }
        let pixel = Vector2::new(p.fx * x / denom + p.cx, p.fy * y / denom + p.cy);
        self.in_image(&pixel).then_some(pixel)
    }

    fn unproject_to_bearing(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let p = &self.parameters;
        let mx = (pixel.x - p.cx) / p.fx;
        let my = (pixel.y - p.cy) / p.fy;
        let mut r2 = mx * mx + my * my;
        if p.alpha > 0.5 {
            // outside the valid disc, clamp to its rim
            r2 = r2.min(1.0 / (2.0 * p.alpha - 1.0));
        }
        let mz = (1.0 - p.alpha * p.alpha * r2)
            / (p.alpha * (1.0 - (2.0 * p.alpha - 1.0) * r2).max(0.0).sqrt() + 1.0 - p.alpha);
        let k = (mz * p.xi + (mz * mz + (1.0 - p.xi * p.xi) * r2).max(0.0).sqrt()) / (mz * mz + r2);
        Vector3::new(k * mx, k * my, k * mz - p.xi).normalize()
    }

    fn image_size(&self) -> (i32, i32) {
        (self.parameters.image_width, self.parameters.image_height)
    }

    fn camera_type(&self) -> CameraType {
        CameraType::DoubleSphere
    }

    fn focal_length(&self) -> f64 {
        0.5 * (self.parameters.fx + self.parameters.fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> DoubleSphereCamera {
        DoubleSphereCamera::new(DoubleSphereParameters {
            camera_name: "fisheye".into(),
            image_width: 1400,
            image_height: 1400,
            fx: 300.0,
            fy: 300.0,
            cx: 700.0,
            cy: 700.0,
            xi: -0.2,
            alpha: 0.6,
        })
    }

    #[test]
    fn test_round_trip_beyond_ninety_degrees() {
        let cam = camera();
        for point in [
            Vector3::new(0.1, 0.2, 3.0),
            Vector3::new(1.0, 0.0, -0.2),
            Vector3::new(-0.5, 0.7, 0.1),
        ] {
            let pixel = cam.project_to_image(&point).unwrap();
            let ray = cam.unproject_to_bearing(&pixel);
            assert!((ray - point.normalize()).norm() < 1e-9, "{point:?}");
        }
    }

    #[test]
    fn test_center_pixel_looks_forward() {
        let ray = camera().unproject_to_bearing(&Vector2::new(700.0, 700.0));
        assert!((ray - Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn test_rejects_points_behind() {
        assert!(camera().project_to_image(&Vector3::new(0.0, 0.0, -1.0)).is_none());
    }
}
