use opencv::core::{Mat, Point2f, Point2i, Scalar, CV_8UC3};
use opencv::imgproc::{COLOR_GRAY2BGR, LINE_8};
use opencv::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Track overlay: fading motion trails plus markers for the current frame.
#[derive(Debug)]
pub struct Visualization {
    /// persistent trails, decayed by `track_fade` on every draw
    vis_mask: Mat,
    /// cleared on every draw
    cur_mask: Mat,
    colors: Vec<Scalar>,
    track_fade: f64,
    track_opacity: f64,
}

impl Visualization {
    pub fn new(track_fade: f64, track_opacity: f64) -> Self {
        Self {
            vis_mask: Mat::default(),
            cur_mask: Mat::default(),
            colors: Vec::new(),
            track_fade,
            track_opacity,
        }
    }

    /// Size the canvases for `(width, height)` images.
    pub fn init(&mut self, image_size: (i32, i32), num_colors: usize) -> anyhow::Result<()> {
        let (width, height) = image_size;
        self.vis_mask = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
        self.cur_mask = Mat::new_rows_cols_with_default(height, width, CV_8UC3, Scalar::all(0.0))?;
        let mut rng = StdRng::seed_from_u64(123);
        self.colors = (0..num_colors.max(100))
            .map(|_| {
                Scalar::new(
                    rng.gen_range(10..200) as f64,
                    rng.gen_range(10..200) as f64,
                    rng.gen_range(10..200) as f64,
                    0.0,
                )
            })
            .collect();
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.vis_mask.empty()
    }

    #[inline]
    fn to_pixel(pt: &Point2f) -> Point2i {
        Point2i::new(pt.x.round() as i32, pt.y.round() as i32)
    }

    /// Track with a known ground-truth pixel. Trail color goes from green to
    /// red as the error reaches one percent of the image size.
    pub fn add_track_with_ground_truth(
        &mut self,
        gnd: &Point2f,
        prev: &Point2f,
        cur: &Point2f,
        error: f64,
        index: usize,
    ) -> anyhow::Result<()> {
        let max_error = (self.vis_mask.rows().min(self.vis_mask.cols()) / 100).max(1) as f64;
        let ratio = (error / max_error).clamp(0.0, 1.0);
        let color = Scalar::new(0.0, 255.0 * (1.0 - ratio), 255.0 * ratio, 0.0);
        opencv::imgproc::line(
            &mut self.vis_mask,
            Self::to_pixel(prev),
            Self::to_pixel(cur),
            color,
            1,
            LINE_8,
            0,
        )?;
        opencv::imgproc::circle(&mut self.cur_mask, Self::to_pixel(cur), 1, color, -1, LINE_8, 0)?;
        let marker = self
            .colors
            .get(index % self.colors.len().max(1))
            .copied()
            .unwrap_or(color);
        opencv::imgproc::circle(&mut self.cur_mask, Self::to_pixel(gnd), 3, marker, -1, LINE_8, 0)?;
        Ok(())
    }

    pub fn add_track(&mut self, prev: &Point2f, cur: &Point2f, _index: usize) -> anyhow::Result<()> {
        let color = Scalar::new(255.0, 0.0, 0.0, 0.0);
        opencv::imgproc::line(
            &mut self.vis_mask,
            Self::to_pixel(prev),
            Self::to_pixel(cur),
            color,
            1,
            LINE_8,
            0,
        )?;
        opencv::imgproc::circle(&mut self.cur_mask, Self::to_pixel(cur), 1, color, -1, LINE_8, 0)?;
        Ok(())
    }

    /// Overlay onto `image` (converted to BGR if gray), then clear the
    /// current-frame markers and fade the trails.
    pub fn draw(&mut self, image: &mut Mat) -> anyhow::Result<()> {
        anyhow::ensure!(self.is_initialized(), "visualization used before init");
        anyhow::ensure!(
            image.rows() == self.vis_mask.rows() && image.cols() == self.vis_mask.cols(),
            "overlay is {}x{}, image is {}x{}",
            self.vis_mask.cols(),
            self.vis_mask.rows(),
            image.cols(),
            image.rows()
        );
        if image.channels() == 1 {
            let mut bgr = Mat::default();
            opencv::imgproc::cvt_color(image, &mut bgr, COLOR_GRAY2BGR, 0)?;
            *image = bgr;
        }
        self.cur_mask.copy_to_masked(image, &self.cur_mask)?;
        let mut blended = Mat::default();
        opencv::core::add_weighted(image, 1.0, &self.vis_mask, self.track_opacity, 0.0, &mut blended, -1)?;
        *image = blended;

        self.cur_mask = Mat::new_rows_cols_with_default(
            image.rows(),
            image.cols(),
            CV_8UC3,
            Scalar::all(0.0),
        )?;
        let mut faded = Mat::default();
        self.vis_mask.convert_to(&mut faded, -1, self.track_fade, 0.0)?;
        self.vis_mask = faded;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Vec3b, CV_8UC1};

    fn black() -> Mat {
        Mat::new_rows_cols_with_default(100, 100, CV_8UC1, Scalar::all(0.0)).unwrap()
    }

    #[test]
    fn test_trails_fade_and_markers_clear() {
        let mut vis = Visualization::new(0.5, 1.0);
        vis.init((100, 100), 0).unwrap();
        vis.add_track(&Point2f::new(10.0, 10.0), &Point2f::new(30.0, 10.0), 0)
            .unwrap();

        let mut image = black();
        vis.draw(&mut image).unwrap();
        assert_eq!(image.channels(), 3);
        // trail at full strength, BGR blue
        assert_eq!(*image.at_2d::<Vec3b>(10, 20).unwrap(), Vec3b::from([255, 0, 0]));
        // marker plus trail saturates
        assert_eq!(image.at_2d::<Vec3b>(11, 30).unwrap()[0], 255);

        let mut image = black();
        vis.draw(&mut image).unwrap();
        let trail = image.at_2d::<Vec3b>(10, 20).unwrap()[0];
        assert!((126..=129).contains(&trail), "{trail}");
        // the marker below the trail is gone
        assert_eq!(image.at_2d::<Vec3b>(11, 30).unwrap()[0], 0);
    }

    #[test]
    fn test_ground_truth_track_colors() {
        let mut vis = Visualization::new(1.0, 1.0);
        vis.init((100, 100), 3).unwrap();
        assert_eq!(vis.colors.len(), 100);
        let gnd = Point2f::new(70.0, 70.0);
        // exact track is green
        vis.add_track_with_ground_truth(&gnd, &Point2f::new(50.0, 50.0), &Point2f::new(50.0, 60.0), 0.0, 4)
            .unwrap();
        // one pixel of error is already the maximum on a 100 pixel image
        vis.add_track_with_ground_truth(&gnd, &Point2f::new(20.0, 20.0), &Point2f::new(20.0, 30.0), 5.0, 4)
            .unwrap();

        let mut image = black();
        vis.draw(&mut image).unwrap();
        assert_eq!(*image.at_2d::<Vec3b>(55, 50).unwrap(), Vec3b::from([0, 255, 0]));
        assert_eq!(*image.at_2d::<Vec3b>(25, 20).unwrap(), Vec3b::from([0, 0, 255]));
        let marker = *image.at_2d::<Vec3b>(70, 70).unwrap();
        assert!(marker.iter().all(|&c| (10..200).contains(&c)));
    }

    #[test]
    fn test_draw_requires_matching_size() {
        let mut vis = Visualization::new(0.9, 0.7);
        assert!(vis.draw(&mut black()).is_err());
        vis.init((50, 40), 10).unwrap();
        assert!(vis.draw(&mut black()).is_err());
    }
}
