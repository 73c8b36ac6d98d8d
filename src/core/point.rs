//! Point and point-cloud types.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Classification assigned to a point by the keypoint extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PointLabel {
    /// Not yet examined, or examined and left unselected.
    #[default]
    Unlabeled,
    /// Above the edge sharpness threshold but suppressed by caps or spacing.
    EdgeCandidate,
    /// Selected as an edge keypoint.
    EdgeSelected,
    /// Below the planar sharpness threshold but suppressed by caps or spacing.
    PlanarCandidate,
    /// Selected as a planar keypoint.
    PlanarSelected,
    /// Selected as a blob keypoint (isotropic neighborhood).
    Blob,
    /// Rejected by the occlusion / parallel-beam / noise filters.
    Invalid,
}

impl PointLabel {
    /// Whether this point may still be picked as a keypoint.
    #[inline]
    pub fn is_selectable(&self) -> bool {
        !matches!(self, PointLabel::Invalid)
    }
}

/// Raw input point of one sweep, as handed over by the driver.
///
/// The azimuth is derived from the position; only the laser index must be
/// provided by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    /// X position in the sensor frame (meters).
    pub x: f64,
    /// Y position in the sensor frame (meters).
    pub y: f64,
    /// Z position in the sensor frame (meters).
    pub z: f64,
    /// Return intensity (sensor units).
    pub intensity: f64,
    /// Index of the laser beam that produced this point.
    pub laser_id: u32,
}

impl SweepPoint {
    /// Create a new raw point.
    #[inline]
    pub fn new(x: f64, y: f64, z: f64, intensity: f64, laser_id: u32) -> Self {
        Self {
            x,
            y,
            z,
            intensity,
            laser_id,
        }
    }

    /// Distance from the sensor origin.
    #[inline]
    pub fn range(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Azimuth angle in the sensor XY plane, in radians.
    #[inline]
    pub fn azimuth(&self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Whether all coordinates are finite.
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A point annotated by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LidarPoint {
    /// Position in the current reference frame (meters).
    pub position: Vector3<f64>,
    /// Return intensity, carried through unchanged.
    pub intensity: f64,
    /// Scan line (sorted laser) index this point belongs to.
    pub scan_line: usize,
    /// Acquisition time relative to the sweep, in [0, 1].
    pub time: f64,
    /// Extractor classification.
    pub label: PointLabel,
    /// Index of this point in the caller's input slice.
    pub source_index: usize,
}

impl LidarPoint {
    /// Range from the frame origin.
    #[inline]
    pub fn range(&self) -> f64 {
        self.position.norm()
    }
}

/// An owned cloud of annotated points.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    /// The points, in no particular order unless stated by the producer.
    pub points: Vec<LidarPoint>,
}

impl PointCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty cloud with reserved capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Number of points.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the cloud holds no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Append a point.
    #[inline]
    pub fn push(&mut self, point: LidarPoint) {
        self.points.push(point);
    }

    /// Iterate over the points.
    pub fn iter(&self) -> std::slice::Iter<'_, LidarPoint> {
        self.points.iter()
    }

    /// Drop all points, keeping the allocation.
    pub fn clear(&mut self) {
        self.points.clear();
    }
}

impl FromIterator<LidarPoint> for PointCloud {
    fn from_iter<I: IntoIterator<Item = LidarPoint>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
