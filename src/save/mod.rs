//! 结果保存
//!
//! Trajectory as CSV, tracking statistics as JSON.

mod stats;
mod trajectory;

pub use stats::write_stats;
pub use trajectory::write_trajectory;
