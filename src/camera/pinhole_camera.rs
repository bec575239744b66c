use anyhow::Context;
use nalgebra::{Vector2, Vector3};
use opencv::core::{FileNodeTraitConst, FileStorageTrait, FileStorageTraitConst};

use super::{CameraModel, CameraParametersTrait, CameraType};

#[derive(Debug, Default, Clone)]
pub struct PinholeParameters {
    pub camera_name: String,
    // size
    pub image_width: i32,
    pub image_height: i32,
    // intrinsic
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    // distortion
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl CameraParametersTrait for PinholeParameters {
    const CAMERA_TYPE: &'static str = "PINHOLE";
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
            "model type {model_type} is not pinhole"
        );
        // image
        let camera_name = fs.get("camera_name")?.to_string()?;
        let image_width = fs.get("image_width")?.to_i32()?;
        let image_height = fs.get("image_height")?.to_i32()?;
        // distortion
        let distortion_parameters = fs
            .get("distortion_parameters")
            .context("missing distortion_parameters")?;
        let k1 = distortion_parameters.get("k1")?.to_f64()?;
        let k2 = distortion_parameters.get("k2")?.to_f64()?;
        let p1 = distortion_parameters.get("p1")?.to_f64()?;
        let p2 = distortion_parameters.get("p2")?.to_f64()?;
        // intrinsic
        let projection_parameters = fs
            .get("projection_parameters")
            .context("missing projection_parameters")?;
        let fx = projection_parameters.get("fx")?.to_f64()?;
        let fy = projection_parameters.get("fy")?.to_f64()?;
        let cx = projection_parameters.get("cx")?.to_f64()?;
        let cy = projection_parameters.get("cy")?.to_f64()?;

        Ok(Self {
            camera_name,
            image_width,
            image_height,
            fx,
            fy,
            cx,
            cy,
            k1,
            k2,
            p1,
            p2,
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
        // distortion
        fs.start_write_struct("distortion_parameters", opencv::core::FileNode_MAP, "")?;
        fs.write_f64("k1", self.k1)?;
        fs.write_f64("k2", self.k2)?;
        fs.write_f64("p1", self.p1)?;
        fs.write_f64("p2", self.p2)?;
        fs.end_write_struct()?;

        // intrinsic
        fs.start_write_struct("projection_parameters", opencv::core::FileNode_MAP, "")?;
        fs.write_f64("fx", self.fx)?;
        fs.write_f64("fy", self.fy)?;
        fs.write_f64("cx", self.cx)?;
        fs.write_f64("cy", self.cy)?;
        fs.end_write_struct()?;
        fs.release()?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PinholeCamera {
    pub parameters: PinholeParameters,
    pub has_distortion: bool,
    pub inv_k11: f64,
    pub inv_k13: f64,
    pub inv_k22: f64,
    pub inv_k23: f64,
}

impl PinholeCamera {
    const UNDISTORT_ITERATIONS: usize = 20;

    pub fn new(parameters: PinholeParameters) -> Self {
        let has_distortion = parameters.k1 != 0.0
            || parameters.k2 != 0.0
            || parameters.p1 != 0.0
            || parameters.p2 != 0.0;
        Self {
            inv_k11: 1.0 / parameters.fx,
            inv_k13: -parameters.cx / parameters.fx,
            inv_k22: 1.0 / parameters.fy,
            inv_k23: -parameters.cy / parameters.fy,
            has_distortion,
            parameters,
        }
    }

    pub fn from_yaml(camera_file: &str) -> anyhow::Result<Self> {
        Ok(Self::new(PinholeParameters::read_from_yaml(camera_file)?))
    }

    /// Offset added by the radial-tangential model at normalized point `(mx, my)`.
    #[inline]
    fn distortion(&self, mx: f64, my: f64) -> (f64, f64) {
        let p = &self.parameters;
        let mx2 = mx * mx;
        let my2 = my * my;
        let mxy = mx * my;
        let rho2 = mx2 + my2;
        let rad = p.k1 * rho2 + p.k2 * rho2 * rho2;
        (
            mx * rad + 2.0 * p.p1 * mxy + p.p2 * (rho2 + 2.0 * mx2),
            my * rad + 2.0 * p.p2 * mxy + p.p1 * (rho2 + 2.0 * my2),
        )
    }
}

impl CameraModel for PinholeCamera {
    fn project_to_image(&self, point: &Vector3<f64>) -> Option<Vector2<f64>> {
        if point.z <= 0.0 {
            return None;
        }
        let mut mx = point.x / point.z;
        let mut my = point.y / point.z;
        if self.has_distortion {
            let (dx, dy) = self.distortion(mx, my);
            mx += dx;
            my += dy;
        }
        let pixel = Vector2::new(
            self.parameters.fx * mx + self.parameters.cx,
            self.parameters.fy * my + self.parameters.cy,
        );
        self.in_image(&pixel).then_some(pixel)
    }

    fn unproject_to_bearing(&self, pixel: &Vector2<f64>) -> Vector3<f64> {
        let mxd = self.inv_k11 * pixel.x + self.inv_k13;
        let myd = self.inv_k22 * pixel.y + self.inv_k23;
        let (mut mx, mut my) = (mxd, myd);
        if self.has_distortion {
            // 迭代去畸变
            for _ in 0..Self::UNDISTORT_ITERATIONS {
                let (dx, dy) = self.distortion(mx, my);
                mx = mxd - dx;
                my = myd - dy;
            }
        }
        Vector3::new(mx, my, 1.0).normalize()
    }

    fn image_size(&self) -> (i32, i32) {
        (self.parameters.image_width, self.parameters.image_height)
    }

    fn camera_type(&self) -> CameraType {
        CameraType::Pinhole
    }

    fn focal_length(&self) -> f64 {
        0.5 * (self.parameters.fx + self.parameters.fy)
    }
}
