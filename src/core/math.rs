//! Small geometric helpers shared across the pipeline.

use nalgebra::{Matrix3, Vector3};

/// Mean of a set of points. Returns the origin for an empty set.
pub fn mean(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}

/// Sample covariance of a set of points around the given mean,
/// normalized by `n`.
pub fn covariance(points: &[Vector3<f64>], center: &Vector3<f64>) -> Matrix3<f64> {
    if points.is_empty() {
        return Matrix3::zeros();
    }
    let mut cov = Matrix3::zeros();
    for p in points {
        let d = p - center;
        cov += d * d.transpose();
    }
    cov / points.len() as f64
}

/// Eigen-decomposition of a symmetric 3×3 matrix with eigenvalues sorted
/// ascending and eigenvectors matched to them.
#[derive(Debug, Clone)]
pub struct SortedEigen {
    /// Eigenvalues, ascending: `values[0] ≤ values[1] ≤ values[2]`.
    pub values: [f64; 3],
    /// Unit eigenvectors, `vectors[i]` belongs to `values[i]`.
    pub vectors: [Vector3<f64>; 3],
}

impl SortedEigen {
    /// Decompose a symmetric matrix.
    pub fn of(matrix: &Matrix3<f64>) -> Self {
        let eig = matrix.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| {
            eig.eigenvalues[a]
                .partial_cmp(&eig.eigenvalues[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let values = [
            eig.eigenvalues[order[0]],
            eig.eigenvalues[order[1]],
            eig.eigenvalues[order[2]],
        ];
        let vectors = [
            eig.eigenvectors.column(order[0]).into_owned(),
            eig.eigenvectors.column(order[1]).into_owned(),
            eig.eigenvectors.column(order[2]).into_owned(),
        ];
        Self { values, vectors }
    }

    /// Smallest eigenvalue.
    #[inline]
    pub fn min(&self) -> f64 {
        self.values[0]
    }

    /// Largest eigenvalue.
    #[inline]
    pub fn max(&self) -> f64 {
        self.values[2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_covariance_of_line() {
        // Points spread along X only: the covariance must be rank one.
        let points: Vec<Vector3<f64>> =
            (0..10).map(|i| Vector3::new(i as f64, 0.0, 0.0)).collect();
        let m = mean(&points);
        assert_relative_eq!(m.x, 4.5, epsilon = 1e-12);

        let cov = covariance(&points, &m);
        let eig = SortedEigen::of(&cov);
        assert!(eig.values[2] > 1.0);
        assert_relative_eq!(eig.values[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(eig.values[1], 0.0, epsilon = 1e-9);
        // Dominant direction is ±X.
        assert_relative_eq!(eig.vectors[2].x.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_eigen_of_plane() {
        // Points on the XY plane: smallest eigenvector must be ±Z.
        let mut points = Vec::new();
        for i in -3..=3 {
            for j in -3..=3 {
                points.push(Vector3::new(i as f64, j as f64, 0.0));
            }
        }
        let m = mean(&points);
        let eig = SortedEigen::of(&covariance(&points, &m));
        assert_relative_eq!(eig.values[0], 0.0, epsilon = 1e-9);
        assert!(eig.values[1] > 1.0);
        assert_relative_eq!(eig.vectors[0].z.abs(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_eigen_sorted() {
        let m = Matrix3::from_diagonal(&Vector3::new(3.0, 1.0, 2.0));
        let eig = SortedEigen::of(&m);
        assert_relative_eq!(eig.values[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(eig.values[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(eig.values[2], 3.0, epsilon = 1e-12);
    }
}
