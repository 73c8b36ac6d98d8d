//! # Gati-SLAM: LiDAR Odometry and Mapping
//!
//! Real-time pose estimation and mapping for spinning multi-beam LiDAR
//! sensors, in the LOAM family: per-scan-line keypoint extraction, a
//! frame-to-frame ego-motion estimate, then a frame-to-map refinement
//! against a rolling voxelized local map.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gati_slam::{LidarOdometry, SlamConfig, SweepPoint};
//!
//! let mut odometry = LidarOdometry::new(SlamConfig::default()).unwrap();
//!
//! // One sweep = one full rotation of the sensor.
//! let sweep: Vec<SweepPoint> = vec![/* driver output */];
//! let summary = odometry.process_sweep(&sweep).unwrap();
//! println!(
//!     "pose: ({:.2}, {:.2}, {:.2}), updated: {}",
//!     summary.pose.tx, summary.pose.ty, summary.pose.tz, summary.pose_updated
//! );
//! ```
//!
//! ## Pipeline
//!
//! ```text
//!   raw sweep ──► sweep (scan-line sort + sweep-relative time)
//!             ──► extraction (edge / planar / blob keypoints)
//!             ──► matching::ego-motion (vs previous sweep keypoints)
//!             ──► matching::mapping (vs rolling-grid local maps)
//!             ──► commit pose, fold keypoints into the maps
//! ```
//!
//! ## Modules
//!
//! - [`core`]: points, clouds, 6-DoF poses, small math helpers
//! - [`sweep`]: the sweep ingestor
//! - [`extraction`]: per-line descriptors and keypoint selection
//! - [`map`]: the rolling voxel grids and their leaf filter
//! - [`matching`]: residual model, neighborhood fitting, the LM solver, and
//!   the two ICP drivers
//! - [`interpolator`]: time-parameterized rigid interpolation (undistortion)
//! - [`smoother`]: a constant-velocity pose smoother consuming the output
//! - [`odometry`]: the top-level sweep processor
//!
//! ## Conventions
//!
//! Coordinates are meters in a right-handed frame; the world frame coincides
//! with the sensor frame of the first sweep. Pose rotations are Euler angles
//! composed `Rz · Ry · Rx`. Sweeps must be submitted in acquisition order;
//! `process_sweep` is synchronous and returns once the sweep's pose is
//! committed.

pub mod core;
pub mod error;
pub mod extraction;
pub mod interpolator;
pub mod map;
pub mod matching;
pub mod odometry;
pub mod smoother;
pub mod sweep;

pub use crate::core::{LidarPoint, PointCloud, PointLabel, Pose, SweepPoint};
pub use error::{Result, SlamError};
pub use extraction::{ExtractedKeypoints, KeypointConfig, KeypointExtractor};
pub use interpolator::TransformInterpolator;
pub use map::{RollingGrid, RollingGridConfig};
pub use matching::{MatchOutcome, MatchReport, MatchStep, MatchingConfig};
pub use odometry::{
    GeneralConfig, LidarOdometry, SkipReason, SlamConfig, SweepDiagnostics, SweepSummary,
};
pub use smoother::{PoseSmoother, PoseSmootherConfig};
pub use sweep::{ScanLines, SweepIngestor};
