//! Rolling voxel grid: the bounded local map of keypoints.
//!
//! A fixed-extent 3-D window of cells centered on a moving anchor. Each cell
//! holds a leaf-filtered point cloud; when the sensor approaches a boundary
//! the window rolls, dropping the cells that fall out of range. Occupied
//! cells are stored sparsely, keyed by integer cell coordinates.

use std::collections::HashMap;

use log::debug;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::core::LidarPoint;
use crate::error::{Result, SlamError};

use super::voxel_filter::downsample;

/// Configuration of a rolling grid.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RollingGridConfig {
    /// Edge length of one grid cell (meters).
    /// Default: 10.0
    pub cell_size: f64,

    /// Number of cells along each axis.
    /// Default: (25, 25, 25)
    pub dimensions: (usize, usize, usize),

    /// Leaf size of the per-cell voxel filter (meters).
    /// Default: 0.6
    pub leaf_size: f64,
}

impl Default for RollingGridConfig {
    fn default() -> Self {
        Self {
            cell_size: 10.0,
            dimensions: (25, 25, 25),
            leaf_size: 0.6,
        }
    }
}

impl RollingGridConfig {
    /// Validate the fatal preconditions.
    pub fn validate(&self) -> Result<()> {
        if !(self.cell_size > 0.0) {
            return Err(SlamError::invalid(
                "cell_size",
                format!("must be positive, got {}", self.cell_size),
            ));
        }
        let (gx, gy, gz) = self.dimensions;
        if gx == 0 || gy == 0 || gz == 0 {
            return Err(SlamError::invalid(
                "dimensions",
                format!("must be non-zero, got ({gx}, {gy}, {gz})"),
            ));
        }
        if !(self.leaf_size > 0.0) {
            return Err(SlamError::invalid(
                "leaf_size",
                format!("must be positive, got {}", self.leaf_size),
            ));
        }
        Ok(())
    }
}

/// Bounded rolling voxel grid of keypoints.
#[derive(Debug, Clone)]
pub struct RollingGrid {
    config: RollingGridConfig,
    /// Cell coordinates of the window's minimum corner.
    origin: (i64, i64, i64),
    /// Occupied cells only.
    cells: HashMap<(i64, i64, i64), Vec<LidarPoint>>,
}

impl RollingGrid {
    /// Create an empty grid centered on the world origin.
    pub fn new(config: RollingGridConfig) -> Result<Self> {
        config.validate()?;
        let origin = Self::origin_for(&config, &Vector3::zeros());
        Ok(Self {
            config,
            origin,
            cells: HashMap::new(),
        })
    }

    /// Leaf size of the per-cell voxel filter.
    pub fn leaf_size(&self) -> f64 {
        self.config.leaf_size
    }

    /// Set the leaf size; applies to subsequent insertions.
    pub fn set_leaf_size(&mut self, leaf_size: f64) -> Result<()> {
        if !(leaf_size > 0.0) {
            return Err(SlamError::invalid(
                "leaf_size",
                format!("must be positive, got {leaf_size}"),
            ));
        }
        self.config.leaf_size = leaf_size;
        Ok(())
    }

    /// Edge length of one cell.
    pub fn cell_size(&self) -> f64 {
        self.config.cell_size
    }

    /// Set the cell size. Existing cells are cleared.
    pub fn set_cell_size(&mut self, cell_size: f64) -> Result<()> {
        if !(cell_size > 0.0) {
            return Err(SlamError::invalid(
                "cell_size",
                format!("must be positive, got {cell_size}"),
            ));
        }
        self.config.cell_size = cell_size;
        self.cells.clear();
        Ok(())
    }

    /// Window dimensions in cells.
    pub fn dimensions(&self) -> (usize, usize, usize) {
        self.config.dimensions
    }

    /// Set the window dimensions. Existing cells are cleared.
    pub fn set_dimensions(&mut self, dimensions: (usize, usize, usize)) -> Result<()> {
        let candidate = RollingGridConfig {
            dimensions,
            ..self.config.clone()
        };
        candidate.validate()?;
        self.config = candidate;
        self.cells.clear();
        Ok(())
    }

    /// Total number of stored points.
    pub fn num_points(&self) -> usize {
        self.cells.values().map(Vec::len).sum()
    }

    /// Whether the grid holds no points.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Drop all cells.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Insert points into their cells, then re-apply the leaf filter on every
    /// touched cell so cells stay subsampled. Points outside the current
    /// window are ignored.
    pub fn insert(&mut self, points: &[LidarPoint]) {
        let mut touched: std::collections::HashSet<(i64, i64, i64)> =
            std::collections::HashSet::new();
        for point in points {
            let cell = self.cell_of(&point.position);
            if !self.in_bounds(cell) {
                continue;
            }
            self.cells.entry(cell).or_default().push(*point);
            touched.insert(cell);
        }

        let leaf = self.config.leaf_size;
        for cell in touched {
            if let Some(bucket) = self.cells.get_mut(&cell) {
                *bucket = downsample(bucket, leaf);
            }
        }
    }

    /// Collect the points within `radius` of `center`, drawn from every cell
    /// overlapping the query sphere.
    pub fn query_radius(&self, center: &Vector3<f64>, radius: f64) -> Vec<LidarPoint> {
        if radius <= 0.0 {
            return Vec::new();
        }
        let size = self.config.cell_size;
        let lo = (
            ((center.x - radius) / size).floor() as i64,
            ((center.y - radius) / size).floor() as i64,
            ((center.z - radius) / size).floor() as i64,
        );
        let hi = (
            ((center.x + radius) / size).floor() as i64,
            ((center.y + radius) / size).floor() as i64,
            ((center.z + radius) / size).floor() as i64,
        );

        let radius_sq = radius * radius;
        let mut found = Vec::new();
        for cx in lo.0..=hi.0 {
            for cy in lo.1..=hi.1 {
                for cz in lo.2..=hi.2 {
                    let Some(bucket) = self.cells.get(&(cx, cy, cz)) else {
                        continue;
                    };
                    found.extend(
                        bucket
                            .iter()
                            .filter(|p| (p.position - center).norm_squared() <= radius_sq)
                            .copied(),
                    );
                }
            }
        }
        found
    }

    /// Shift the window so `anchor` lies near its center. Cells that fall out
    /// of the new window are dropped; recentering on the same anchor twice is
    /// a no-op.
    pub fn recenter(&mut self, anchor: &Vector3<f64>) {
        let new_origin = Self::origin_for(&self.config, anchor);
        if new_origin == self.origin {
            return;
        }
        self.origin = new_origin;
        let before = self.cells.len();
        let (gx, gy, gz) = self.config.dimensions;
        let origin = self.origin;
        self.cells.retain(|&(cx, cy, cz), _| {
            cx >= origin.0
                && cx < origin.0 + gx as i64
                && cy >= origin.1
                && cy < origin.1 + gy as i64
                && cz >= origin.2
                && cz < origin.2 + gz as i64
        });
        if before != self.cells.len() {
            debug!("rolling grid dropped {} cells", before - self.cells.len());
        }
    }

    /// Window origin that centers the window on `anchor`.
    fn origin_for(config: &RollingGridConfig, anchor: &Vector3<f64>) -> (i64, i64, i64) {
        let (gx, gy, gz) = config.dimensions;
        let cell = (
            (anchor.x / config.cell_size).floor() as i64,
            (anchor.y / config.cell_size).floor() as i64,
            (anchor.z / config.cell_size).floor() as i64,
        );
        (
            cell.0 - gx as i64 / 2,
            cell.1 - gy as i64 / 2,
            cell.2 - gz as i64 / 2,
        )
    }

    /// Cell coordinates of a position.
    #[inline]
    fn cell_of(&self, position: &Vector3<f64>) -> (i64, i64, i64) {
        let size = self.config.cell_size;
        (
            (position.x / size).floor() as i64,
            (position.y / size).floor() as i64,
            (position.z / size).floor() as i64,
        )
    }

    /// Whether a cell lies inside the current window.
    #[inline]
    fn in_bounds(&self, cell: (i64, i64, i64)) -> bool {
        let (gx, gy, gz) = self.config.dimensions;
        cell.0 >= self.origin.0
            && cell.0 < self.origin.0 + gx as i64
            && cell.1 >= self.origin.1
            && cell.1 < self.origin.1 + gy as i64
            && cell.2 >= self.origin.2
            && cell.2 < self.origin.2 + gz as i64
    }
}
