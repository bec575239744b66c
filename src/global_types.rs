use std::sync::atomic::{AtomicUsize, Ordering};

/// 3x4 rigid transform `[R | t]`.
pub type Pose = nalgebra::Matrix3x4<f64>;
pub type FrameId = usize;
pub type LandmarkId = usize;

/// Dataset timestamp in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub i64);
impl Timestamp {
    pub fn as_sec(&self) -> f64 {
        self.0 as f64 / 1e9
    }
    /// dt
    pub fn duration_since(&self, other: &Timestamp) -> f64 {
        (self.0 - other.0) as f64 / 1e9
    }
}

/// Hands out monotonically increasing identifiers.
///
/// One generator is shared (usually behind an `Arc`) by everything that creates
/// frames, and a separate one by everything that creates landmarks. IDs are never
/// reused.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicUsize,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    pub fn starting_at(first: usize) -> Self {
        Self {
            next: AtomicUsize::new(first),
        }
    }

    pub fn next_id(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The ID the next call to [IdGenerator::next_id] will return.
    pub fn peek(&self) -> usize {
        self.next.load(Ordering::SeqCst)
    }
}

#[test]
fn test_timestamp() {
    let t1 = Timestamp(1_000_000_000);
    let t2 = Timestamp(3_500_000_000);
    assert!((t2.duration_since(&t1) - 2.5).abs() < 1e-12);
    assert!((t1.as_sec() - 1.0).abs() < 1e-12);
}
