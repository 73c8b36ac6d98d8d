//! Point-to-geometry residual terms accumulated during ICP.
//!
//! Each term scores one keypoint against its matched line, plane, or blob:
//! `w · (R(t)·X + T(t) − P)ᵀ A (R(t)·X + T(t) − P)`, where `A` encodes the
//! matched geometry (`n·nᵀ` for a plane, `(I − n·nᵀ)ᵀ(I − n·nᵀ)` for a line)
//! and `(R(t), T(t))` is the time-interpolated rigid transform.

use nalgebra::{Matrix3, Vector3};

/// One matched keypoint's contribution to the objective.
#[derive(Debug, Clone, Copy)]
pub struct ResidualTerm {
    /// Symmetric positive semi-definite weighting matrix `A`.
    pub weighting: Matrix3<f64>,
    /// Point `P` on the matched geometry, in the target frame.
    pub target: Vector3<f64>,
    /// Keypoint `X` in the sensor frame.
    pub keypoint: Vector3<f64>,
    /// Robust outlier attenuation weight in [0, 1].
    pub weight: f64,
    /// Sweep-relative acquisition time of `X`, in [0, 1].
    pub time: f64,
}

impl ResidualTerm {
    /// Evaluate this term's cost under a rigid transform.
    #[inline]
    pub fn cost(&self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> f64 {
        let e = rotation * self.keypoint + translation - self.target;
        self.weight * (e.dot(&(self.weighting * e)))
    }
}

/// The accumulated terms of one ICP pass.
///
/// Single-owner accumulator: match discovery appends here and hands the set
/// to the solver, so a parallel split only needs per-worker sets concatenated
/// before assembly.
#[derive(Debug, Clone, Default)]
pub struct ResidualSet {
    /// The accumulated terms.
    pub terms: Vec<ResidualTerm>,
}

impl ResidualSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of terms.
    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the set holds no terms.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Append a term.
    #[inline]
    pub fn push(&mut self, term: ResidualTerm) {
        self.terms.push(term);
    }

    /// Drop all terms, keeping the allocation.
    pub fn clear(&mut self) {
        self.terms.clear();
    }

    /// Total cost under a single rigid transform (no time interpolation).
    pub fn total_cost(&self, rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> f64 {
        self.terms
            .iter()
            .map(|t| t.cost(rotation, translation))
            .sum()
    }
}
