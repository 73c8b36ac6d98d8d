//! Per-step matching parameters.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SlamError};

/// Minimum total number of line + plane terms required to run the solver.
pub const MIN_TOTAL_MATCHES: usize = 20;

/// Which estimation step a matcher is running.
///
/// The two steps share the ICP/LM machinery but select neighbors differently
/// and read their own parameter pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStep {
    /// Frame-to-frame matching against the previous sweep's keypoints.
    EgoMotion,
    /// Frame-to-map matching against the rolling grids.
    Mapping,
}

/// Parameter pack for one matching step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// The step this pack belongs to.
    pub step: MatchStep,

    /// Maximum Levenberg-Marquardt iterations per ICP pass.
    /// Default: 15
    pub lm_max_iter: usize,

    /// Maximum outer ICP passes.
    /// Default: 4 (ego-motion), 3 (mapping)
    pub icp_max_iter: usize,

    /// Number of nearest edge neighbors gathered per keypoint.
    /// Default: 10 (ego-motion), 15 (mapping)
    pub line_neighbors: usize,

    /// Minimum surviving neighbors for a line match.
    /// Default: 4 (ego-motion), 5 (mapping)
    pub min_line_neighbors: usize,

    /// A neighborhood counts as a line when `λ_max > factor · λ_mid`.
    /// Default: 5.0
    pub line_eigen_factor: f64,

    /// Number of nearest planar neighbors gathered per keypoint.
    /// Default: 5
    pub plane_neighbors: usize,

    /// Plane acceptance requires `λ_max < factor1 · λ_mid`.
    /// Default: 35.0
    pub plane_eigen_factor1: f64,

    /// Plane acceptance requires `λ_mid > factor2 · λ_min`.
    /// Default: 8.0
    pub plane_eigen_factor2: f64,

    /// Maximum distance of the gathered neighbors to their fitted line; a
    /// looser fit rejects the match.
    /// Default: 0.10 (ego-motion), 0.2 (mapping)
    pub max_line_distance: f64,

    /// Maximum distance of the gathered neighbors to their fitted plane.
    /// Default: 0.2
    pub max_plane_distance: f64,

    /// Sample-consensus inlier cap used by the mapping line neighbor
    /// refinement. Unused by ego-motion.
    /// Default: 0.2
    pub line_max_dist_inlier: f64,
}

impl MatchingConfig {
    /// The ego-motion parameter pack with its default values.
    pub fn ego_motion() -> Self {
        Self {
            step: MatchStep::EgoMotion,
            lm_max_iter: 15,
            icp_max_iter: 4,
            line_neighbors: 10,
            min_line_neighbors: 4,
            line_eigen_factor: 5.0,
            plane_neighbors: 5,
            plane_eigen_factor1: 35.0,
            plane_eigen_factor2: 8.0,
            max_line_distance: 0.10,
            max_plane_distance: 0.2,
            line_max_dist_inlier: 0.2,
        }
    }

    /// The mapping parameter pack with its default values.
    pub fn mapping() -> Self {
        Self {
            step: MatchStep::Mapping,
            lm_max_iter: 15,
            icp_max_iter: 3,
            line_neighbors: 15,
            min_line_neighbors: 5,
            line_eigen_factor: 5.0,
            plane_neighbors: 5,
            plane_eigen_factor1: 35.0,
            plane_eigen_factor2: 8.0,
            max_line_distance: 0.2,
            max_plane_distance: 0.2,
            line_max_dist_inlier: 0.2,
        }
    }

    /// Validate the fatal preconditions.
    pub fn validate(&self) -> Result<()> {
        if self.line_neighbors < 2 || self.plane_neighbors < 3 {
            return Err(SlamError::invalid(
                "neighbors",
                "line matching needs ≥ 2 and plane matching ≥ 3 neighbors",
            ));
        }
        for (name, value) in [
            ("max_line_distance", self.max_line_distance),
            ("max_plane_distance", self.max_plane_distance),
            ("line_max_dist_inlier", self.line_max_dist_inlier),
        ] {
            if !(value > 0.0) {
                return Err(SlamError::invalid(
                    name,
                    format!("must be positive, got {value}"),
                ));
            }
        }
        Ok(())
    }

    /// Builder-style setter for the outer ICP iteration cap.
    pub fn with_icp_max_iter(mut self, value: usize) -> Self {
        self.icp_max_iter = value;
        self
    }

    /// Builder-style setter for the LM iteration cap.
    pub fn with_lm_max_iter(mut self, value: usize) -> Self {
        self.lm_max_iter = value;
        self
    }
}
