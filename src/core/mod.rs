//! Fundamental types: points, clouds, poses, and small math helpers.

pub mod math;
pub mod point;
pub mod pose;

pub use point::{LidarPoint, PointCloud, PointLabel, SweepPoint};
pub use pose::Pose;
