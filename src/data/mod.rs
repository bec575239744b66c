//! Frames and the landmark ledger.

mod frame;
mod landmark;

pub use frame::{Frame, FrameBuilder};
pub use landmark::{Feature, Landmark};

use crate::global_types::FrameId;

/// Frame lookup in an id-ordered frame sequence.
pub fn frame_by_id(frames: &[Frame], id: FrameId) -> Option<&Frame> {
    frames
        .binary_search_by_key(&id, Frame::id)
        .ok()
        .map(|index| &frames[index])
}

#[cfg(test)]
pub(crate) use frame::tests::test_camera;
