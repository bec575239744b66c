//! Feature detection, tracking and the polar region index.

pub mod detector;
pub mod region;
pub mod tracker;

pub use detector::{Detector, GoodFeaturesDetector};
pub use region::{RegionBounds, RegionCell, RegionGrid, RegionOccupancy};
pub use tracker::{LucasKanadeTracker, TrackResult, Tracker};

use opencv::core::{Mat, Point2f, Vector};

use crate::data::Frame;

/// Pixels of a frame may only be read while it is decompressed.
fn ensure_decompressed(frame: &Frame) -> anyhow::Result<()> {
    anyhow::ensure!(
        !frame.is_compressed(),
        "frame {}: images are compressed",
        frame.id()
    );
    Ok(())
}

/// Single channel 8 bit view of an image, converting when needed.
fn to_gray(image: &Mat) -> anyhow::Result<Mat> {
    use opencv::prelude::*;

    let code = match image.channels() {
        1 => return Ok(image.try_clone()?),
        3 => opencv::imgproc::COLOR_BGR2GRAY,
        4 => opencv::imgproc::COLOR_BGRA2GRAY,
        n => anyhow::bail!("unsupported channel count {n}"),
    };
    let mut gray = Mat::default();
    opencv::imgproc::cvt_color(image, &mut gray, code, 0)?;
    Ok(gray)
}

/// Euclidean distance between two points.
#[inline]
fn distance(a: &Point2f, b: &Point2f) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// 删除状态为false的点。
#[inline]
fn reduce_vector<T: Copy>(v: &[T], status: &[bool]) -> Vec<T> {
    status
        .iter()
        .zip(v.iter())
        .filter(|(state, _)| **state)
        .map(|(_, p)| *p)
        .collect()
}

fn to_cv_points(points: &[Point2f]) -> Vector<Point2f> {
    Vector::from_slice(points)
}
