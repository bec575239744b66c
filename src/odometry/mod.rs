//! Relative pose constraints and frame pose estimation.

pub mod five_point;
pub mod pnp;

pub use five_point::{EssentialEstimate, FivePoint, OutlierChecker};
pub use pnp::Pnp;
