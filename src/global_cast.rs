//! 全局类型转换
//!
//! OpenCV `Mat` 与 nalgebra 类型之间的转换。

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use opencv::core::{Mat, CV_64F};
use opencv::prelude::*;

#[derive(Debug, Clone, Default)]
pub struct Matrix3d(pub Matrix3<f64>);

/// 将 3x3 `CV_64F` [Mat] 转换为 [Matrix3]
impl TryFrom<&Mat> for Matrix3d {
    type Error = anyhow::Error;

    fn try_from(mat: &Mat) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mat.rows() == 3 && mat.cols() == 3 && mat.typ() == CV_64F,
            "expected a 3x3 CV_64F matrix, got {}x{}",
            mat.rows(),
            mat.cols()
        );
        let mut matrix = Matrix3::<f64>::zeros();
        for i in 0..3 {
            for j in 0..3 {
                matrix[(i, j)] = *mat.at_2d::<f64>(i as i32, j as i32)?;
            }
        }
        Ok(Matrix3d(matrix))
    }
}

impl TryFrom<Matrix3d> for Mat {
    type Error = anyhow::Error;

    fn try_from(matrix: Matrix3d) -> anyhow::Result<Mat> {
        let rows: [[f64; 3]; 3] = std::array::from_fn(|i| std::array::from_fn(|j| matrix.0[(i, j)]));
        Ok(Mat::from_slice_2d(&rows)?)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Vector3d(pub Vector3<f64>);

/// 3x1 或 1x3 `CV_64F` [Mat]
impl TryFrom<&Mat> for Vector3d {
    type Error = anyhow::Error;

    fn try_from(mat: &Mat) -> anyhow::Result<Self> {
        anyhow::ensure!(
            mat.rows() * mat.cols() == 3 && mat.typ() == CV_64F,
            "expected 3 CV_64F values, got {}x{} of type {}",
            mat.rows(),
            mat.cols(),
            mat.typ()
        );
        Ok(Vector3d(Vector3::new(
            *mat.at::<f64>(0)?,
            *mat.at::<f64>(1)?,
            *mat.at::<f64>(2)?,
        )))
    }
}

impl TryFrom<Vector3d> for Mat {
    type Error = anyhow::Error;

    fn try_from(vector: Vector3d) -> anyhow::Result<Mat> {
        Ok(Mat::from_slice_2d(&[[vector.0.x], [vector.0.y], [vector.0.z]])?)
    }
}

#[derive(Debug, Clone)]
pub struct RotationVector(pub Vector3<f64>);

impl RotationVector {
    /// 轴角 (Rodrigues) 向量转换为旋转矩阵
    pub fn to_rotation(&self) -> Rotation3<f64> {
        Rotation3::new(self.0)
    }

    pub fn from_rotation(rotation: &Rotation3<f64>) -> Self {
        Self(UnitQuaternion::from_rotation_matrix(rotation).scaled_axis())
    }
}

#[test]
fn test_mat_to_matrix() {
    let mat = Mat::from_slice_2d(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]).unwrap();
    let matrix = Matrix3d::try_from(&mat).unwrap();
    assert_eq!(matrix.0[(1, 2)], 6.0);

    let back: Mat = Matrix3d(matrix.0.transpose()).try_into().unwrap();
    assert_eq!(*back.at_2d::<f64>(2, 1).unwrap(), 6.0);

    let wrong = Mat::from_slice_2d(&[[1.0f32, 0.0], [0.0, 1.0]]).unwrap();
    assert!(Matrix3d::try_from(&wrong).is_err());
}

#[test]
fn test_mat_to_vector() {
    let mat: Mat = Vector3d(Vector3::new(1.0, -2.0, 0.5)).try_into().unwrap();
    let vector = Vector3d::try_from(&mat).unwrap();
    assert_eq!(vector.0, Vector3::new(1.0, -2.0, 0.5));
}

#[test]
fn test_rotation_vector() {
    let rotation = Rotation3::from_euler_angles(0.2, -0.1, 0.4);
    let rvec = RotationVector::from_rotation(&rotation);
    assert!((rvec.to_rotation().matrix() - rotation.matrix()).norm() < 1e-12);
}
