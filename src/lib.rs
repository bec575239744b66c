//! Visual SLAM front end for pinhole and omnidirectional cameras.
//!
//! opencv
//! https://docs.rs/opencv/latest/opencv/all.html
//!
//! nalgebra
//! https://docs.rs/nalgebra/latest/nalgebra/

pub mod camera;
pub mod config;
pub mod data;
pub mod dataset;
pub mod feature;
pub mod global_cast;
pub mod global_types;
pub mod module;
pub mod odometry;
pub mod reconstruction;
pub mod save;
pub mod utility;
