use opencv::core::{Mat, Point2f, Size, TermCriteria, Vector};
use opencv::prelude::*;

use crate::config::TrackerConfig;
use crate::data::{Feature, Frame, Landmark};
use crate::global_types::FrameId;

/// Outcome of propagating landmarks into a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackResult {
    pub num_tracked: usize,
    /// One entry per tracked landmark, in landmark order.
    pub errors: Vec<f64>,
}

/// Propagates landmarks from the current keyframe into new frames.
pub trait Tracker: Send {
    /// Make `frame` the first keyframe.
    fn init(&mut self, frame: &Frame) -> anyhow::Result<()>;
    /// Append an observation in `frame` to every landmark that could be followed.
    fn track(&mut self, landmarks: &mut [Landmark], frame: &Frame) -> anyhow::Result<TrackResult>;
    fn last_keyframe(&self) -> Option<FrameId>;
}

/// 追踪锚点：关键帧的灰度图像副本
#[derive(Debug)]
struct Keyframe {
    id: FrameId,
    gray: Mat,
}

/// Pyramidal Lucas-Kanade from the keyframe to each new frame, with an
/// optional forward-backward check.
#[derive(Debug)]
pub struct LucasKanadeTracker {
    config: TrackerConfig,
    keyframe: Option<Keyframe>,
    /// last frame landmarks were propagated into
    prev_frame: Option<FrameId>,
    frames_since_keyframe: usize,
}

impl LucasKanadeTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            keyframe: None,
            prev_frame: None,
            frames_since_keyframe: 0,
        }
    }

    /// 判断点是否在图像边界内。
    #[inline]
    fn in_border(&self, pt: &Point2f, cols: i32, rows: i32) -> bool {
        let border = self.config.border_size;
        let img_x = pt.x.round() as i32;
        let img_y = pt.y.round() as i32;
        img_x >= border && img_x < cols - border && img_y >= border && img_y < rows - border
    }

    fn criteria() -> anyhow::Result<TermCriteria> {
        Ok(TermCriteria::new(
            opencv::core::TermCriteria_EPS + opencv::core::TermCriteria_COUNT,
            30,
            0.01,
        )?)
    }

    /// Flow of `prev_pts` from `prev_img` to `cur_img`, starting at `guess`.
    /// Returns the tracked points, a success flag and the LK error per point.
    fn flow(
        &self,
        prev_img: &Mat,
        cur_img: &Mat,
        prev_pts: &[Point2f],
        guess: &[Point2f],
    ) -> anyhow::Result<(Vec<Point2f>, Vec<bool>, Vec<f32>)> {
        let prev_pts = super::to_cv_points(prev_pts);
        let mut cur_pts = super::to_cv_points(guess);
        let mut status = Vector::<u8>::new();
        let mut err = Vector::<f32>::new();
        let window = Size::new(self.config.window_size, self.config.window_size);
        opencv::video::calc_optical_flow_pyr_lk(
            prev_img,
            cur_img,
            &prev_pts,
            &mut cur_pts,
            &mut status,
            &mut err,
            window,
            self.config.pyramid_levels,
            Self::criteria()?,
            opencv::video::OPTFLOW_USE_INITIAL_FLOW,
            1e-4,
        )?;

        let mut ok: Vec<bool> = status.iter().map(|s| s != 0).collect();
        // [x] reverse check
        if self.config.flow_back {
            let mut reverse_status = Vector::<u8>::new();
            let mut reverse_pts = prev_pts.clone();
            let mut reverse_err = Vector::<f32>::new();
            opencv::video::calc_optical_flow_pyr_lk(
                cur_img,
                prev_img,
                &cur_pts,
                &mut reverse_pts,
                &mut reverse_status,
                &mut reverse_err,
                window,
                self.config.pyramid_levels,
                Self::criteria()?,
                opencv::video::OPTFLOW_USE_INITIAL_FLOW,
                1e-4,
            )?;
            for (i, state) in ok.iter_mut().enumerate() {
                *state = *state
                    && reverse_status.get(i)? != 0
                    && super::distance(&prev_pts.get(i)?, &reverse_pts.get(i)?)
                        <= self.config.max_flow_back_error;
            }
        }
        // [x] in_border
        let (cols, rows) = (cur_img.cols(), cur_img.rows());
        let cur_pts = cur_pts.to_vec();
        for (state, pt) in ok.iter_mut().zip(cur_pts.iter()) {
            *state = *state && self.in_border(pt, cols, rows);
        }
        Ok((cur_pts, ok, err.to_vec()))
    }

    fn set_keyframe(&mut self, frame: &Frame) -> anyhow::Result<()> {
        self.keyframe = Some(Keyframe {
            id: frame.id(),
            gray: super::to_gray(frame.image())?,
        });
        self.frames_since_keyframe = 0;
        log::debug!("new keyframe {}", frame.id());
        Ok(())
    }

    /// Tracks the points just found in the primary image into the stereo image.
    fn track_stereo(
        &self,
        landmarks: &mut [Landmark],
        tracked: &[usize],
        cur_gray: &Mat,
        frame: &Frame,
    ) -> anyhow::Result<usize> {
        let Some(stereo_image) = frame.stereo_image() else {
            return Ok(0);
        };
        let stereo_gray = super::to_gray(stereo_image)?;
        let pts: Vec<Point2f> = tracked
            .iter()
            .filter_map(|&i| landmarks[i].observation_by_frame_id(frame.id()))
            .map(Feature::keypoint)
            .collect();
        if pts.is_empty() {
            return Ok(0);
        }
        let (stereo_pts, ok, _) = self.flow(cur_gray, &stereo_gray, &pts, &pts)?;
        let indices = super::reduce_vector(tracked, &ok);
        let stereo_pts = super::reduce_vector(&stereo_pts, &ok);
        for (&index, pt) in indices.iter().zip(stereo_pts.iter()) {
            landmarks[index].add_stereo_observation(Feature::new(frame.id(), *pt))?;
        }
        Ok(indices.len())
    }
}

impl Tracker for LucasKanadeTracker {
    fn init(&mut self, frame: &Frame) -> anyhow::Result<()> {
        super::ensure_decompressed(frame)?;
        self.set_keyframe(frame)?;
        self.prev_frame = Some(frame.id());
        Ok(())
    }

    fn track(&mut self, landmarks: &mut [Landmark], frame: &Frame) -> anyhow::Result<TrackResult> {
        super::ensure_decompressed(frame)?;
        let (Some(keyframe), Some(prev_frame)) = (self.keyframe.as_ref(), self.prev_frame) else {
            anyhow::bail!("tracker used before init");
        };

        // landmarks still alive in the previous frame and anchored in the keyframe
        let mut candidates = Vec::new();
        let mut prev_pts = Vec::new();
        let mut guess = Vec::new();
        for (index, landmark) in landmarks.iter().enumerate() {
            let (Some(anchor), Some(last)) = (
                landmark.observation_by_frame_id(keyframe.id),
                landmark.last_observation(),
            ) else {
                continue;
            };
            if last.frame_id() != prev_frame {
                continue;
            }
            candidates.push(index);
            prev_pts.push(anchor.keypoint());
            guess.push(last.keypoint());
        }

        let cur_gray = super::to_gray(frame.image())?;
        let mut result = TrackResult::default();
        let mut tracked = Vec::new();
        if !candidates.is_empty() {
            let (cur_pts, ok, err) = self.flow(&keyframe.gray, &cur_gray, &prev_pts, &guess)?;
            for (i, &index) in candidates.iter().enumerate() {
                if !ok[i] {
                    continue;
                }
                landmarks[index].add_observation(Feature::new(frame.id(), cur_pts[i]))?;
                result.errors.push(err.get(i).copied().unwrap_or_default() as f64);
                tracked.push(index);
            }
        }
        result.num_tracked = tracked.len();
        let num_stereo = self.track_stereo(landmarks, &tracked, &cur_gray, frame)?;
        log::debug!(
            "frame {}: tracked {}/{} from keyframe {}, {} stereo",
            frame.id(),
            result.num_tracked,
            candidates.len(),
            keyframe.id,
            num_stereo
        );

        self.prev_frame = Some(frame.id());
        self.frames_since_keyframe += 1;
        let interval_reached = self.config.keyframe_interval > 0
            && self.frames_since_keyframe >= self.config.keyframe_interval;
        let too_few = !candidates.is_empty()
            && (result.num_tracked as f64) < self.config.min_tracked_ratio * candidates.len() as f64;
        if interval_reached || too_few {
            self.set_keyframe(frame)?;
        }
        Ok(result)
    }

    fn last_keyframe(&self) -> Option<FrameId> {
        self.keyframe.as_ref().map(|k| k.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::test_camera;
    use crate::feature::detector::tests::{checkerboard, checkerboard_at};
    use crate::global_types::IdGenerator;
    use crate::utility::Utility;

    /// Landmarks on the corners of the square at (50, 50).
    fn corner_landmarks(frame_id: FrameId) -> Vec<Landmark> {
        [(50.0, 50.0), (69.0, 50.0), (50.0, 69.0), (69.0, 69.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| {
                let mut landmark = Landmark::new(i);
                landmark
                    .add_observation(Feature::new(frame_id, Point2f::new(x, y)))
                    .unwrap();
                landmark
            })
            .collect()
    }

    #[test]
    fn test_track_shifted_image() {
        let ids = IdGenerator::new();
        let camera = test_camera(200, 200);
        let first = Frame::builder(checkerboard(200), 0.0, camera.clone()).build(&ids);
        let second = Frame::builder(checkerboard_at(200, 3, 2), 0.1, camera).build(&ids);

        let mut tracker = LucasKanadeTracker::new(TrackerConfig::default());
        tracker.init(&first).unwrap();
        assert_eq!(tracker.last_keyframe(), Some(first.id()));

        let mut landmarks = corner_landmarks(first.id());
        let result = tracker.track(&mut landmarks, &second).unwrap();
        assert_eq!(result.num_tracked, 4);
        assert_eq!(result.errors.len(), 4);
        for landmark in landmarks.iter() {
            let before = landmark.observation_by_frame_id(first.id()).unwrap().pixel();
            let after = landmark.observation_by_frame_id(second.id()).unwrap().pixel();
            let flow = after - before;
            assert!((flow.x - 3.0).abs() < 0.5 && (flow.y - 2.0).abs() < 0.5, "{flow:?}");
        }
        // default interval makes every frame a keyframe
        assert_eq!(tracker.last_keyframe(), Some(second.id()));
    }

    #[test]
    fn test_failed_tracks_are_not_resumed() {
        let ids = IdGenerator::new();
        let camera = test_camera(200, 200);
        let frames: Vec<Frame> = (0..3)
            .map(|i| Frame::builder(checkerboard(200), i as f64, camera.clone()).build(&ids))
            .collect();
        let mut tracker = LucasKanadeTracker::new(TrackerConfig {
            keyframe_interval: 0,
            ..Default::default()
        });
        tracker.init(&frames[0]).unwrap();
        let mut landmarks = corner_landmarks(frames[0].id());

        tracker.track(&mut landmarks, &frames[1]).unwrap();
        // landmark 0 is dropped in frame 1 (outlier or pruned)
        landmarks[0].remove_last_observation();
        let result = tracker.track(&mut landmarks, &frames[2]).unwrap();
        assert_eq!(result.num_tracked, 3);
        assert!(!landmarks[0].is_observed_in_frame(frames[2].id()));
        // no keyframe change with the interval disabled
        assert_eq!(tracker.last_keyframe(), Some(frames[0].id()));
    }

    #[test]
    fn test_stereo_observations() {
        let ids = IdGenerator::new();
        let camera = test_camera(200, 200);
        let first = Frame::builder(checkerboard(200), 0.0, camera.clone()).build(&ids);
        let second = Frame::builder(checkerboard(200), 0.1, camera.clone())
            .stereo(checkerboard_at(200, 4, 0), Utility::identity_pose(), camera)
            .build(&ids);

        let mut tracker = LucasKanadeTracker::new(TrackerConfig::default());
        tracker.init(&first).unwrap();
        let mut landmarks = corner_landmarks(first.id());
        tracker.track(&mut landmarks, &second).unwrap();
        for landmark in landmarks.iter() {
            let mono = landmark.observation_by_frame_id(second.id()).unwrap().pixel();
            let stereo = landmark.stereo_observation_by_frame_id(second.id()).unwrap().pixel();
            assert!(((stereo - mono).x - 4.0).abs() < 0.5);
        }
    }

    #[test]
    fn test_track_requires_init() {
        let ids = IdGenerator::new();
        let frame = Frame::builder(checkerboard(100), 0.0, test_camera(100, 100)).build(&ids);
        let mut tracker = LucasKanadeTracker::new(TrackerConfig::default());
        assert!(tracker.track(&mut [], &frame).is_err());
        assert_eq!(tracker.last_keyframe(), None);
    }
}
