//! Leaf-voxel downsampling for map cells.
//!
//! Bins points into cubic leaves and keeps, per occupied leaf, the point
//! closest to the leaf centroid. Keeping a measured point (rather than the
//! centroid itself) preserves the per-point annotations the matcher relies
//! on.

use std::collections::HashMap;

use nalgebra::Vector3;

use crate::core::LidarPoint;

/// Integer leaf coordinates for a position.
#[inline]
fn leaf_index(position: &Vector3<f64>, leaf_size: f64) -> (i64, i64, i64) {
    (
        (position.x / leaf_size).floor() as i64,
        (position.y / leaf_size).floor() as i64,
        (position.z / leaf_size).floor() as i64,
    )
}

/// Downsample a cloud so that each cubic leaf of edge `leaf_size` keeps a
/// single representative point.
pub fn downsample(points: &[LidarPoint], leaf_size: f64) -> Vec<LidarPoint> {
    if leaf_size <= 0.0 || points.len() < 2 {
        return points.to_vec();
    }

    // leaf index -> (position accumulator, count) for the leaf centroid
    let mut leaves: HashMap<(i64, i64, i64), (Vector3<f64>, usize)> = HashMap::new();
    for point in points {
        let entry = leaves
            .entry(leaf_index(&point.position, leaf_size))
            .or_insert((Vector3::zeros(), 0));
        entry.0 += point.position;
        entry.1 += 1;
    }

    let mut best: HashMap<(i64, i64, i64), (usize, f64)> = HashMap::with_capacity(leaves.len());
    for (idx, point) in points.iter().enumerate() {
        let key = leaf_index(&point.position, leaf_size);
        let (sum, count) = leaves[&key];
        let centroid = sum / count as f64;
        let dist = (point.position - centroid).norm_squared();
        match best.get_mut(&key) {
            None => {
                best.insert(key, (idx, dist));
            }
            Some((best_idx, best_dist)) if dist < *best_dist => {
                *best_idx = idx;
                *best_dist = dist;
            }
            _ => {}
        }
    }

    let mut kept: Vec<usize> = best.into_values().map(|(idx, _)| idx).collect();
    kept.sort_unstable();
    kept.into_iter().map(|idx| points[idx]).collect()
}
