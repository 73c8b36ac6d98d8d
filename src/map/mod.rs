//! The local map: rolling voxel grids of keypoints with leaf-filtered cells.

pub mod rolling_grid;
pub mod voxel_filter;

pub use rolling_grid::{RollingGrid, RollingGridConfig};
