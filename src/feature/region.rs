//! Polar partition of the image plane used for feature-density control.
//!
//! A cell is one (radial ring, angular sector) bin. Radii are normalized by
//! `max(width, height)` and measured from the image center, angles come from
//! [Utility::fast_atan2] and cover `[-pi, pi]`.

use nalgebra::Vector2;
use opencv::core::Rect;
use rayon::prelude::*;

use crate::data::Landmark;
use crate::utility::Utility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionCell {
    pub radial: usize,
    pub angular: usize,
}

/// Polar bounds of a cell, radius in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionBounds {
    pub r_min: f64,
    pub r_max: f64,
    pub t_min: f64,
    pub t_max: f64,
}

impl RegionBounds {
    /// Half-open in both coordinates, like the breakpoint search.
    #[inline]
    pub fn contains(&self, r: f64, t: f64) -> bool {
        r >= self.r_min && r < self.r_max && t >= self.t_min && t < self.t_max
    }

    /// Pixel bounds test for an image of `width x height`.
    pub fn contains_pixel(&self, pixel: &Vector2<f64>, width: i32, height: i32) -> bool {
        let imsize = width.max(height) as f64;
        let (r, t) = Utility::polar_coordinates(pixel, width, height);
        self.contains(r * imsize, t)
    }

    /// Smallest pixel rectangle of a `width x height` image holding every
    /// pixel of the sector, `None` when the sector misses the image.
    pub fn pixel_rect(&self, width: i32, height: i32) -> Option<Rect> {
        let (cx, cy) = (width as f64 / 2.0 - 0.5, height as f64 / 2.0 - 0.5);
        // corner pixels are the farthest from the center
        if self.r_min > cx.hypot(cy) {
            return None;
        }
        // extremes sit on the corners or where the outer arc crosses an axis
        let mut polar = vec![
            (self.r_min, self.t_min),
            (self.r_min, self.t_max),
            (self.r_max, self.t_min),
            (self.r_max, self.t_max),
        ];
        for k in -2..=2 {
            let t = k as f64 * std::f64::consts::FRAC_PI_2;
            if t > self.t_min && t < self.t_max {
                polar.push((self.r_max, t));
            }
        }
        let (mut x0, mut y0) = (f64::INFINITY, f64::INFINITY);
        let (mut x1, mut y1) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for (r, t) in polar {
            let (x, y) = (cx + r * t.cos(), cy + r * t.sin());
            x0 = x0.min(x);
            y0 = y0.min(y);
            x1 = x1.max(x);
            y1 = y1.max(y);
        }
        let left = (x0.floor() as i32 - 1).max(0);
        let top = (y0.floor() as i32 - 1).max(0);
        let right = (x1.ceil() as i32 + 2).min(width);
        let bottom = (y1.ceil() as i32 + 2).min(height);
        (left < right && top < bottom).then(|| Rect::new(left, top, right - left, bottom - top))
    }
}

/// Fixed radial and angular breakpoints, shared read-only by every frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionGrid {
    rs: Vec<f64>,
    ts: Vec<f64>,
}

impl RegionGrid {
    pub fn new(rs: Vec<f64>, ts: Vec<f64>) -> anyhow::Result<Self> {
        anyhow::ensure!(rs.len() >= 2, "need at least two radial breakpoints");
        anyhow::ensure!(ts.len() >= 2, "need at least two angular breakpoints");
        anyhow::ensure!(
            rs.windows(2).all(|w| w[0] < w[1]),
            "radial breakpoints must increase: {rs:?}"
        );
        anyhow::ensure!(
            ts.windows(2).all(|w| w[0] < w[1]),
            "angular breakpoints must increase: {ts:?}"
        );
        Ok(Self { rs, ts })
    }

    /// `num_angular` equal sectors over `[-pi, pi]`.
    pub fn with_uniform_sectors(rs: Vec<f64>, num_angular: usize) -> anyhow::Result<Self> {
        anyhow::ensure!(num_angular > 0, "need at least one angular sector");
        let step = 2.0 * std::f64::consts::PI / num_angular as f64;
        let ts = (0..=num_angular)
            .map(|j| -std::f64::consts::PI + j as f64 * step)
            .collect();
        Self::new(rs, ts)
    }

    pub fn radial_breakpoints(&self) -> &[f64] {
        &self.rs
    }

    pub fn angular_breakpoints(&self) -> &[f64] {
        &self.ts
    }

    pub fn num_radial_bins(&self) -> usize {
        self.rs.len() - 1
    }

    pub fn num_angular_bins(&self) -> usize {
        self.ts.len() - 1
    }

    pub fn num_cells(&self) -> usize {
        self.num_radial_bins() * self.num_angular_bins()
    }

    #[inline]
    pub fn cell_index(&self, cell: RegionCell) -> usize {
        cell.radial * self.num_angular_bins() + cell.angular
    }

    #[inline]
    pub fn cell_at(&self, index: usize) -> RegionCell {
        RegionCell {
            radial: index / self.num_angular_bins(),
            angular: index % self.num_angular_bins(),
        }
    }

    /// Bin of a value by upper-bound search; values past the last breakpoint
    /// fall into the last bin, values before the first have no bin.
    #[inline]
    fn bin(breakpoints: &[f64], value: f64) -> Option<usize> {
        let upper = breakpoints.partition_point(|&b| b <= value);
        upper.min(breakpoints.len() - 1).checked_sub(1)
    }

    pub fn locate(&self, r: f64, t: f64) -> Option<RegionCell> {
        Some(RegionCell {
            radial: Self::bin(&self.rs, r)?,
            angular: Self::bin(&self.ts, t)?,
        })
    }

    pub fn locate_pixel(&self, pixel: &Vector2<f64>, width: i32, height: i32) -> Option<RegionCell> {
        let (r, t) = Utility::polar_coordinates(pixel, width, height);
        self.locate(r, t)
    }

    /// Bounds of a cell for an image whose larger side is `imsize` pixels.
    pub fn bounds(&self, cell: RegionCell, imsize: f64) -> RegionBounds {
        RegionBounds {
            r_min: self.rs[cell.radial] * imsize,
            r_max: self.rs[cell.radial + 1] * imsize,
            t_min: self.ts[cell.angular],
            t_max: self.ts[cell.angular + 1],
        }
    }
}

/// Per-frame observation count and landmark indices of every cell.
/// Rebuilt from scratch each frame.
#[derive(Debug, Clone, Default)]
pub struct RegionOccupancy {
    landmarks: Vec<Vec<usize>>,
}

impl RegionOccupancy {
    pub fn new(grid: &RegionGrid) -> Self {
        Self {
            landmarks: vec![Vec::new(); grid.num_cells()],
        }
    }

    pub fn reset(&mut self, grid: &RegionGrid) {
        self.landmarks.iter_mut().for_each(Vec::clear);
        self.landmarks.resize(grid.num_cells(), Vec::new());
    }

    pub fn insert(&mut self, cell_index: usize, landmark_index: usize) {
        self.landmarks[cell_index].push(landmark_index);
    }

    pub fn count(&self, cell_index: usize) -> usize {
        self.landmarks.get(cell_index).map_or(0, Vec::len)
    }

    pub fn landmarks(&self, cell_index: usize) -> &[usize] {
        self.landmarks
            .get(cell_index)
            .map_or(&[][..], |cell| cell.as_slice())
    }

    pub fn total(&self) -> usize {
        self.landmarks.iter().map(Vec::len).sum()
    }

    /// Indices of cells holding fewer than `min` observations.
    pub fn cells_below(&self, min: usize) -> Vec<usize> {
        (0..self.landmarks.len())
            .filter(|&index| self.count(index) < min)
            .collect()
    }

    /// Bring every cell down to at most `max` observations.
    ///
    /// Landmarks in an over-full cell are ranked by total observation count,
    /// richest first (ties keep the older landmark), and the lowest-ranked
    /// excess lose their most recent observation. Decisions are made per cell
    /// in parallel and depend on nothing outside the cell. Returns the dropped
    /// landmark indices in cell order.
    pub fn prune(&mut self, landmarks: &mut [Landmark], max: usize) -> Vec<usize> {
        let ledger: &[Landmark] = landmarks;
        let dropped: Vec<Vec<usize>> = self
            .landmarks
            .par_iter_mut()
            .map(|cell| {
                if cell.len() <= max {
                    return Vec::new();
                }
                cell.sort_by(|&a, &b| {
                    ledger[b]
                        .num_observations()
                        .cmp(&ledger[a].num_observations())
                        .then(a.cmp(&b))
                });
                cell.split_off(max)
            })
            .collect();

        let dropped: Vec<usize> = dropped.into_iter().flatten().collect();
        for &index in dropped.iter() {
            landmarks[index].remove_last_observation();
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Feature;
    use opencv::core::Point2f;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn quadrant_grid() -> RegionGrid {
        RegionGrid::new(
            vec![0.0, 0.2, 0.4, 0.6, 0.8],
            vec![-PI, -FRAC_PI_2, 0.0, FRAC_PI_2, PI],
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_unsorted_breakpoints() {
        assert!(RegionGrid::new(vec![0.0, 0.3, 0.2], vec![-PI, PI]).is_err());
        assert!(RegionGrid::new(vec![0.0], vec![-PI, PI]).is_err());
    }

    #[test]
    fn test_locate_by_binary_search() {
        let grid = quadrant_grid();
        assert_eq!(grid.num_cells(), 16);
        assert_eq!(
            grid.locate(0.3, 0.5),
            Some(RegionCell {
                radial: 1,
                angular: 2
            })
        );
        // breakpoints belong to the bin they open
        assert_eq!(grid.locate(0.2, 0.0).unwrap(), RegionCell { radial: 1, angular: 2 });
        // beyond the last breakpoint clamps into the last bin
        assert_eq!(grid.locate(0.95, PI).unwrap(), RegionCell { radial: 3, angular: 3 });
        assert!(grid.locate(-0.1, 0.0).is_none());

        let cell = RegionCell { radial: 2, angular: 1 };
        assert_eq!(grid.cell_at(grid.cell_index(cell)), cell);
    }

    #[test]
    fn test_every_pixel_maps_to_one_cell() {
        let grid = RegionGrid::with_uniform_sectors(vec![0.0, 0.25, 0.5, 0.75], 8).unwrap();
        let (width, height) = (64, 48);
        let imsize = 64.0;
        for v in 0..height {
            for u in 0..width {
                let pixel = Vector2::new(u as f64, v as f64);
                let cell = grid.locate_pixel(&pixel, width, height).unwrap();
                let matches = (0..grid.num_cells())
                    .filter(|&i| grid.bounds(grid.cell_at(i), imsize).contains_pixel(&pixel, width, height))
                    .count();
                assert!(matches <= 1);
                if matches == 1 {
                    assert!(grid.bounds(cell, imsize).contains_pixel(&pixel, width, height));
                }
            }
        }
    }

    #[test]
    fn test_pixel_rect_holds_whole_sector() {
        let grid = RegionGrid::with_uniform_sectors(vec![0.0, 0.1, 0.3, 0.6], 7).unwrap();
        let (width, height) = (80, 60);
        let imsize = 80.0;
        for i in 0..grid.num_cells() {
            let bounds = grid.bounds(grid.cell_at(i), imsize);
            let rect = bounds.pixel_rect(width, height);
            for v in 0..height {
                for u in 0..width {
                    if !bounds.contains_pixel(&Vector2::new(u as f64, v as f64), width, height) {
                        continue;
                    }
                    let rect = rect.unwrap();
                    assert!(u >= rect.x && u < rect.x + rect.width);
                    assert!(v >= rect.y && v < rect.y + rect.height);
                }
            }
            if let Some(rect) = rect {
                assert!(rect.x >= 0 && rect.y >= 0);
                assert!(rect.x + rect.width <= width && rect.y + rect.height <= height);
                // inner rings stay well below the full image
                if i < grid.num_angular_bins() {
                    assert!(rect.area() < width * height / 4);
                }
            }
        }

        // a ring beyond the image corners
        let far = RegionBounds {
            r_min: 100.0,
            r_max: 200.0,
            t_min: -PI,
            t_max: PI,
        };
        assert!(far.pixel_rect(width, height).is_none());
    }

    fn landmark_with_history(id: usize, num_observations: usize) -> Landmark {
        let mut landmark = Landmark::new(id);
        // history in frames before the current one (frame 50)
        for f in 0..num_observations - 1 {
            landmark
                .add_observation(Feature::new(f, Point2f::new(70.7, 70.7)))
                .unwrap();
        }
        landmark
            .add_observation(Feature::new(50, Point2f::new(70.7, 70.7)))
            .unwrap();
        landmark
    }

    #[test]
    fn test_prune_drops_lowest_ranked_excess() {
        let grid = quadrant_grid();
        let cell = grid.cell_index(RegionCell { radial: 1, angular: 2 });
        // landmark i has history length from this table
        let lengths = [5, 2, 9, 1, 7, 3, 8, 4, 10, 6];
        let mut landmarks: Vec<Landmark> = lengths
            .iter()
            .enumerate()
            .map(|(i, &n)| landmark_with_history(i, n))
            .collect();

        let mut occupancy = RegionOccupancy::new(&grid);
        for i in 0..landmarks.len() {
            occupancy.insert(cell, i);
        }
        // a second, small cell must be left alone
        let other = grid.cell_index(RegionCell { radial: 0, angular: 0 });
        landmarks.push(landmark_with_history(10, 1));
        occupancy.insert(other, 10);

        let mut dropped = occupancy.prune(&mut landmarks, 6);
        dropped.sort_unstable();
        // fewest observations: lengths 1, 2, 3, 4 at indices 3, 1, 5, 7
        assert_eq!(dropped, vec![1, 3, 5, 7]);
        assert_eq!(occupancy.count(cell), 6);
        assert_eq!(occupancy.count(other), 1);

        for (i, &n) in lengths.iter().enumerate() {
            let landmark = &landmarks[i];
            if dropped.contains(&i) {
                assert_eq!(landmark.num_observations(), n - 1);
                assert!(!landmark.is_observed_in_frame(50));
            } else {
                assert_eq!(landmark.num_observations(), n);
                assert!(landmark.is_observed_in_frame(50));
            }
        }
        assert!(landmarks[10].is_observed_in_frame(50));
    }

    #[test]
    fn test_prune_independent_of_thread_count() {
        let grid = quadrant_grid();
        // many crowded cells with tied histories
        let mut landmarks = Vec::new();
        let mut occupancy = RegionOccupancy::new(&grid);
        for cell in 0..grid.num_cells() {
            for k in 0..(4 + cell % 5) {
                let index = landmarks.len();
                landmarks.push(landmark_with_history(index, 1 + (k + cell) % 3));
                occupancy.insert(cell, index);
            }
        }

        let run = |threads: usize| {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap();
            let mut landmarks = landmarks.clone();
            let mut occupancy = occupancy.clone();
            let dropped = pool.install(|| occupancy.prune(&mut landmarks, 3));
            let counts: Vec<usize> = landmarks.iter().map(Landmark::num_observations).collect();
            let cells: Vec<Vec<usize>> = (0..grid.num_cells())
                .map(|i| occupancy.landmarks(i).to_vec())
                .collect();
            (dropped, counts, cells)
        };

        let single = run(1);
        assert!(!single.0.is_empty());
        assert_eq!(single, run(8));
        // cell 0 holds histories 1, 2, 3, 1: the tie goes to index 0
        assert_eq!(single.2[0], vec![2, 1, 0]);
        assert_eq!(single.0[0], 3);
    }

    #[test]
    fn test_prune_is_noop_at_or_below_max() {
        let grid = quadrant_grid();
        let mut landmarks: Vec<Landmark> = (0..3).map(|i| landmark_with_history(i, 2)).collect();
        let mut occupancy = RegionOccupancy::new(&grid);
        (0..3).for_each(|i| occupancy.insert(5, i));
        assert!(occupancy.prune(&mut landmarks, 3).is_empty());
        assert_eq!(occupancy.total(), 3);
        assert_eq!(occupancy.cells_below(1).len(), 15);
    }
}
