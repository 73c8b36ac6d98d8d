//! Configuration for keypoint extraction.

use serde::{Deserialize, Serialize};

/// Minimum selected keypoints per category for a sweep to count as dense
/// enough to estimate motion from.
pub const MIN_KEYPOINTS_PER_CATEGORY: usize = 10;

/// Configuration for the per-scan-line keypoint extractor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeypointConfig {
    /// Half-width W of the neighborhoods used by the discrete differential
    /// operators, in points.
    /// Default: 4
    pub neighbor_width: usize,

    /// Points closer than this to the sensor are dropped before extraction.
    /// Default: 3.0 m
    pub min_distance_to_sensor: f64,

    /// Maximum number of edge keypoints selected per scan line.
    /// Default: 200
    pub max_edge_per_scan_line: usize,

    /// Maximum number of planar keypoints selected per scan line.
    /// Default: 200
    pub max_planar_per_scan_line: usize,

    /// Sharpness threshold (sine of the neighborhood angle) above which a
    /// point qualifies as an edge.
    /// Default: 0.86 (~60°)
    pub edge_sin_angle_threshold: f64,

    /// Sharpness threshold below which a point qualifies as planar.
    /// Default: 0.5 (~30°)
    pub plane_sin_angle_threshold: f64,

    /// Depth discontinuity above which the far side of an occlusion boundary
    /// is invalidated.
    /// Default: 0.15 m
    pub edge_depth_gap_threshold: f64,

    /// Azimuthal resolution of the sensor, radians between consecutive
    /// firings on one line.
    /// Default: 0.4° (0.00698132 rad)
    pub angle_resolution: f64,

    /// Whether to additionally select blob keypoints (isotropic
    /// neighborhoods) for the blob map.
    /// Default: false
    pub use_blob: bool,

    /// Sphericity (λ_min / λ_max of the neighborhood covariance) above which
    /// a point qualifies as a blob.
    /// Default: 0.35
    pub sphericity_threshold: f64,
}

impl Default for KeypointConfig {
    fn default() -> Self {
        Self {
            neighbor_width: 4,
            min_distance_to_sensor: 3.0,
            max_edge_per_scan_line: 200,
            max_planar_per_scan_line: 200,
            edge_sin_angle_threshold: 0.86,
            plane_sin_angle_threshold: 0.5,
            edge_depth_gap_threshold: 0.15,
            angle_resolution: 0.00698132,
            use_blob: false,
            sphericity_threshold: 0.35,
        }
    }
}

impl KeypointConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter for the neighborhood half-width.
    pub fn with_neighbor_width(mut self, value: usize) -> Self {
        self.neighbor_width = value;
        self
    }

    /// Builder-style setter for the per-line edge cap.
    pub fn with_max_edge_per_scan_line(mut self, value: usize) -> Self {
        self.max_edge_per_scan_line = value;
        self
    }

    /// Builder-style setter for the per-line planar cap.
    pub fn with_max_planar_per_scan_line(mut self, value: usize) -> Self {
        self.max_planar_per_scan_line = value;
        self
    }

    /// Builder-style setter for the edge sharpness threshold.
    pub fn with_edge_sin_angle_threshold(mut self, value: f64) -> Self {
        self.edge_sin_angle_threshold = value;
        self
    }

    /// Builder-style setter for the planar sharpness threshold.
    pub fn with_plane_sin_angle_threshold(mut self, value: f64) -> Self {
        self.plane_sin_angle_threshold = value;
        self
    }

    /// Builder-style setter for the occlusion depth-gap threshold.
    pub fn with_edge_depth_gap_threshold(mut self, value: f64) -> Self {
        self.edge_depth_gap_threshold = value;
        self
    }

    /// Builder-style setter for blob selection.
    pub fn with_use_blob(mut self, value: bool) -> Self {
        self.use_blob = value;
        self
    }
}
