//! Neighborhood gathering and local geometry fitting.
//!
//! For each keypoint the matcher gathers nearest neighbors from the target
//! cloud, validates the neighborhood, and fits a line, plane, or blob model
//! whose covariance shape gates acceptance:
//!
//! - line: `λ_max > factor · λ_mid` (elongated), direction = top eigenvector
//! - plane: `λ_mid > factor2 · λ_min` and `λ_max < factor1 · λ_mid`,
//!   normal = bottom eigenvector
//!
//! Neighbor selection is step-specific: ego-motion requires edge neighbors
//! from at least two distinct scan lines (a single beam yields a degenerate
//! colinear set), mapping refines edge neighbors with a pairwise sample
//! consensus over the gathered set.

use std::collections::HashSet;

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Matrix3, Vector3};

use crate::core::math::{covariance, mean, SortedEigen};
use crate::core::PointCloud;

use super::rejection::RejectionCause;

/// Build a kd-tree over a cloud; items are indices into the cloud.
pub fn build_kdtree(cloud: &PointCloud) -> KdTree<f64, 3> {
    let mut tree: KdTree<f64, 3> = KdTree::new();
    for (i, point) in cloud.iter().enumerate() {
        tree.add(
            &[point.position.x, point.position.y, point.position.z],
            i as u64,
        );
    }
    tree
}

/// Indices and positions of a gathered neighborhood.
struct Gathered {
    indices: Vec<usize>,
    positions: Vec<Vector3<f64>>,
}

/// Gather the k nearest neighbors within `max_radius` of `query`.
fn gather(
    tree: &KdTree<f64, 3>,
    cloud: &PointCloud,
    query: &Vector3<f64>,
    k: usize,
    max_radius: f64,
) -> Result<Gathered, RejectionCause> {
    let found = tree.nearest_n::<SquaredEuclidean>(&[query.x, query.y, query.z], k);
    if found.is_empty() {
        return Err(RejectionCause::InsufficientNeighbors);
    }
    let max_sq = max_radius * max_radius;
    if found[0].distance > max_sq {
        return Err(RejectionCause::NeighborhoodTooFar);
    }

    let mut indices = Vec::with_capacity(found.len());
    let mut positions = Vec::with_capacity(found.len());
    for neighbor in found.iter().filter(|n| n.distance <= max_sq) {
        let idx = neighbor.item as usize;
        indices.push(idx);
        positions.push(cloud.points[idx].position);
    }
    Ok(Gathered { indices, positions })
}

/// Edge neighbors for the ego-motion step.
///
/// The neighbors must span at least two distinct scan lines and at least
/// `min_count` of them must lie within `max_radius`.
pub fn ego_motion_line_neighbors(
    tree: &KdTree<f64, 3>,
    cloud: &PointCloud,
    query: &Vector3<f64>,
    k: usize,
    min_count: usize,
    max_radius: f64,
) -> Result<Vec<Vector3<f64>>, RejectionCause> {
    let gathered = gather(tree, cloud, query, k, max_radius)?;
    if gathered.indices.len() < min_count {
        return Err(RejectionCause::InsufficientNeighbors);
    }

    let lines: HashSet<usize> = gathered
        .indices
        .iter()
        .map(|&i| cloud.points[i].scan_line)
        .collect();
    if lines.len() < 2 {
        return Err(RejectionCause::Other);
    }

    Ok(gathered.positions)
}

/// Edge neighbors for the mapping step, refined by sample consensus.
///
/// Every neighbor pair proposes a line; the pair with the most inliers
/// (within `max_dist_inlier`) wins and its inlier set is returned.
pub fn mapping_line_neighbors(
    tree: &KdTree<f64, 3>,
    cloud: &PointCloud,
    query: &Vector3<f64>,
    k: usize,
    min_count: usize,
    max_radius: f64,
    max_dist_inlier: f64,
) -> Result<Vec<Vector3<f64>>, RejectionCause> {
    let gathered = gather(tree, cloud, query, k, max_radius)?;
    let positions = gathered.positions;
    if positions.len() < min_count {
        return Err(RejectionCause::InsufficientNeighbors);
    }

    let mut best_inliers: Vec<usize> = Vec::new();
    for i in 0..positions.len() {
        for j in i + 1..positions.len() {
            let direction = positions[j] - positions[i];
            let length = direction.norm();
            if length < f64::EPSILON {
                continue;
            }
            let direction = direction / length;

            let inliers: Vec<usize> = (0..positions.len())
                .filter(|&p| {
                    let rel = positions[p] - positions[i];
                    (rel - rel.dot(&direction) * direction).norm() <= max_dist_inlier
                })
                .collect();
            if inliers.len() > best_inliers.len() {
                best_inliers = inliers;
            }
        }
    }

    if best_inliers.len() < min_count {
        return Err(RejectionCause::InsufficientNeighbors);
    }
    Ok(best_inliers.into_iter().map(|i| positions[i]).collect())
}

/// Planar neighbors: the k nearest within `max_radius`, all required.
pub fn plane_neighbors(
    tree: &KdTree<f64, 3>,
    cloud: &PointCloud,
    query: &Vector3<f64>,
    k: usize,
    max_radius: f64,
) -> Result<Vec<Vector3<f64>>, RejectionCause> {
    let gathered = gather(tree, cloud, query, k, max_radius)?;
    if gathered.positions.len() < k {
        return Err(RejectionCause::InsufficientNeighbors);
    }
    Ok(gathered.positions)
}

/// A fitted local model ready to become a residual term.
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// The SPD weighting matrix `A`.
    pub weighting: Matrix3<f64>,
    /// The neighborhood mean `P`.
    pub centroid: Vector3<f64>,
    /// Squared spread of the neighborhood (largest eigenvalue); the scale
    /// of the robust weight.
    pub spread_sq: f64,
}

/// Fit a line model to a neighborhood.
pub fn fit_line(
    neighbors: &[Vector3<f64>],
    eigen_factor: f64,
    max_model_distance: f64,
) -> Result<FittedModel, RejectionCause> {
    let centroid = mean(neighbors);
    let eig = SortedEigen::of(&covariance(neighbors, &centroid));
    if !eig.values.iter().all(|v| v.is_finite()) {
        return Err(RejectionCause::DegenerateNumerics);
    }
    if eig.values[2] <= eigen_factor * eig.values[1] {
        return Err(RejectionCause::BadEigenRatio);
    }

    let direction = eig.vectors[2];
    // The gathered points must actually hug their own line.
    for p in neighbors {
        let rel = p - centroid;
        let off_line = rel - rel.dot(&direction) * direction;
        if off_line.norm() > max_model_distance {
            return Err(RejectionCause::ResidualTooLarge);
        }
    }

    let projector = Matrix3::identity() - direction * direction.transpose();
    Ok(FittedModel {
        weighting: projector.transpose() * projector,
        centroid,
        spread_sq: eig.max(),
    })
}

/// Fit a plane model to a neighborhood.
pub fn fit_plane(
    neighbors: &[Vector3<f64>],
    eigen_factor1: f64,
    eigen_factor2: f64,
    max_model_distance: f64,
) -> Result<FittedModel, RejectionCause> {
    let centroid = mean(neighbors);
    let eig = SortedEigen::of(&covariance(neighbors, &centroid));
    if !eig.values.iter().all(|v| v.is_finite()) {
        return Err(RejectionCause::DegenerateNumerics);
    }
    if eig.values[1] <= eigen_factor2 * eig.values[0]
        || eig.values[2] >= eigen_factor1 * eig.values[1]
    {
        return Err(RejectionCause::BadEigenRatio);
    }

    let normal = eig.vectors[0];
    for p in neighbors {
        if (p - centroid).dot(&normal).abs() > max_model_distance {
            return Err(RejectionCause::ResidualTooLarge);
        }
    }

    Ok(FittedModel {
        weighting: normal * normal.transpose(),
        centroid,
        spread_sq: eig.max(),
    })
}

/// Fit a blob model: an isotropic point-to-position match.
pub fn fit_blob(neighbors: &[Vector3<f64>]) -> Result<FittedModel, RejectionCause> {
    if neighbors.len() < 3 {
        return Err(RejectionCause::InsufficientNeighbors);
    }
    let centroid = mean(neighbors);
    let eig = SortedEigen::of(&covariance(neighbors, &centroid));
    if !eig.values.iter().all(|v| v.is_finite()) {
        return Err(RejectionCause::DegenerateNumerics);
    }
    Ok(FittedModel {
        weighting: Matrix3::identity(),
        centroid,
        spread_sq: eig.max(),
    })
}
