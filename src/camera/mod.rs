//! Camera projection models.
//!
//! The tracking core only ever talks to a camera through [CameraModel]:
//! "project a point to a pixel" and "unproject a pixel to a bearing ray".

mod double_sphere_camera;
mod pinhole_camera;
pub use double_sphere_camera::{DoubleSphereCamera, DoubleSphereParameters};
pub use pinhole_camera::{PinholeCamera, PinholeParameters};

use nalgebra::{Vector2, Vector3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraType {
    /// - 最简单的相机模型，假设光线沿直线传播。
    /// - 可选的径向/切向畸变 (k1, k2, p1, p2)。
    Pinhole,
    /// - Double Sphere 全向相机模型，适用于视场角超过 180° 的鱼眼镜头。
    /// - 投影与反投影都有闭式解。
    DoubleSphere,
}

/// Projection capability shared by frames (read-only, usually behind an `Arc`).
pub trait CameraModel: Send + Sync + std::fmt::Debug {
    /// Project a point in the camera frame. `None` when the point is behind the
    /// model's valid region or lands outside the image.
    fn project_to_image(&self, point: &Vector3<f64>) -> Option<Vector2<f64>>;
    /// Unit bearing ray through a pixel.
    fn unproject_to_bearing(&self, pixel: &Vector2<f64>) -> Vector3<f64>;
    /// `(width, height)`
    fn image_size(&self) -> (i32, i32);
    fn camera_type(&self) -> CameraType;
    /// Focal length in pixels, used to turn pixel thresholds into angles.
    fn focal_length(&self) -> f64;

    #[inline]
    fn in_image(&self, pixel: &Vector2<f64>) -> bool {
        let (width, height) = self.image_size();
        pixel.x >= 0.0 && pixel.y >= 0.0 && pixel.x < width as f64 && pixel.y < height as f64
    }
}

/// 相机参数的trait
pub trait CameraParametersTrait: Default + Sized {
    const CAMERA_TYPE: &'static str;
    fn read_from_yaml(path: &str) -> anyhow::Result<Self>;
    fn write_to_yaml(&self, path: &str) -> anyhow::Result<()>;
}

/// Load whichever model the YAML file declares in `model_type`.
pub fn load_camera_from_yaml(path: &str) -> anyhow::Result<Box<dyn CameraModel>> {
    use opencv::core::{FileNodeTraitConst, FileStorageTraitConst};

    let fs = opencv::core::FileStorage::new(
        path,
        opencv::core::FileStorage_Mode::READ as i32,
        "utf-8",
    )?;
    anyhow::ensure!(fs.is_opened()?, "cannot open camera file {path}");
    let model_type = fs.get("model_type")?.to_string()?;
    log::info!("camera model: {model_type}");
    if model_type == PinholeParameters::CAMERA_TYPE {
        Ok(Box::new(PinholeCamera::new(
            PinholeParameters::read_from_yaml(path)?,
        )))
    } else if model_type == DoubleSphereParameters::CAMERA_TYPE {
        Ok(Box::new(DoubleSphereCamera::new(
            DoubleSphereParameters::read_from_yaml(path)?,
        )))
    } else {
        anyhow::bail!("unsupported camera model type {model_type}")
    }
}
