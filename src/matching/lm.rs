//! Levenberg-Marquardt solver for the 6-DoF pose.
//!
//! Minimizes `Σ w·(R(t)·X + T(t) − P)ᵀ A (R(t)·X + T(t) − P)` over the six
//! pose parameters with analytic Jacobians of the Z·Y·X rotation. LM blends
//! Gauss-Newton with gradient descent: the damping factor λ grows on a bad
//! step and shrinks on a good one.
//!
//! With undistortion enabled the residual uses the exact time-interpolated
//! transform between a base pose (t = 0) and the candidate (t = 1); the
//! Jacobian of a term with time `t` scales the pose columns by `t`, the
//! first-order linearization of the interpolated motion.

use nalgebra::{Matrix3x6, Matrix6, Vector6};

use crate::core::Pose;
use crate::interpolator::TransformInterpolator;

use super::residual::ResidualSet;

/// A Hessian whose smallest eigenvalue falls below this fraction of the
/// largest is treated as singular.
const SINGULAR_EIGEN_RATIO: f64 = 1e-10;

/// Solver configuration for one matching step.
#[derive(Clone, Debug)]
pub struct LmConfig {
    /// Maximum iterations.
    pub max_iterations: usize,

    /// Stop when the parameter step norm falls below this.
    /// Default: 1e-10
    pub step_tolerance: f64,

    /// Stop when the gradient norm falls below this.
    /// Default: 1e-12
    pub gradient_tolerance: f64,

    /// Initial damping factor λ.
    /// Default: 1e-3
    pub initial_lambda: f64,

    /// Factor applied to λ on a bad step (and inversely on a good one).
    /// Default: 10.0
    pub lambda_factor: f64,

    /// Lower bound for λ.
    pub min_lambda: f64,

    /// Upper bound for λ; exceeding it ends the optimization.
    pub max_lambda: f64,

    /// Divergence guard: a translation increment beyond this aborts.
    pub max_translation_increment: f64,

    /// Whether residuals use the time-interpolated transform.
    pub undistortion: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            step_tolerance: 1e-10,
            gradient_tolerance: 1e-12,
            initial_lambda: 1e-3,
            lambda_factor: 10.0,
            min_lambda: 1e-9,
            max_lambda: 1e7,
            max_translation_increment: f64::INFINITY,
            undistortion: false,
        }
    }
}

/// How the optimization ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmStatus {
    /// Step or gradient fell below tolerance.
    Converged,
    /// Iteration budget exhausted (still a usable estimate).
    MaxIterations,
    /// The normal equations are singular; the increment was discarded.
    Singular,
    /// The translation increment tripped the divergence guard.
    Diverged,
}

/// Result of one LM run.
#[derive(Debug, Clone)]
pub struct LmResult {
    /// The optimized pose (the initial pose on `Singular` / `Diverged`).
    pub pose: Pose,
    /// Iterations performed.
    pub iterations: usize,
    /// Final total weighted cost.
    pub cost: f64,
    /// Termination status.
    pub status: LmStatus,
}

/// Minimize the residual set over the pose, starting from `initial`.
///
/// `base` is the pose at sweep-relative time 0 when undistortion is active
/// (identity for ego-motion, the previous world pose for mapping); it is
/// ignored otherwise.
pub fn optimize_pose(
    terms: &ResidualSet,
    initial: Pose,
    base: &Pose,
    config: &LmConfig,
) -> LmResult {
    if terms.is_empty() {
        return LmResult {
            pose: initial,
            iterations: 0,
            cost: 0.0,
            status: LmStatus::Converged,
        };
    }

    let mut pose = initial;
    let mut lambda = config.initial_lambda;
    let mut current_cost = evaluate_cost(terms, &pose, base, config.undistortion);
    let mut status = LmStatus::MaxIterations;
    let mut iterations = 0;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let (hessian, gradient) = build_normal_equations(terms, &pose, base, config.undistortion);

        let eigenvalues = hessian.symmetric_eigen().eigenvalues;
        let max_eigen = eigenvalues.max();
        if !(max_eigen > 0.0) || eigenvalues.min() < SINGULAR_EIGEN_RATIO * max_eigen {
            status = LmStatus::Singular;
            pose = initial;
            break;
        }

        let mut damped = hessian;
        for i in 0..6 {
            damped[(i, i)] += lambda * hessian[(i, i)];
        }
        let Some(cholesky) = damped.cholesky() else {
            lambda *= config.lambda_factor;
            if lambda > config.max_lambda {
                status = LmStatus::Singular;
                pose = initial;
                break;
            }
            continue;
        };
        let delta: Vector6<f64> = cholesky.solve(&(-gradient));

        let mut params = pose.params();
        for i in 0..6 {
            params[i] += delta[i];
        }
        let trial = Pose::from_params(&params);

        if (trial.translation() - initial.translation()).norm() > config.max_translation_increment
        {
            status = LmStatus::Diverged;
            pose = initial;
            break;
        }

        let trial_cost = evaluate_cost(terms, &trial, base, config.undistortion);
        if trial_cost < current_cost {
            pose = trial;
            current_cost = trial_cost;
            lambda = (lambda / config.lambda_factor).max(config.min_lambda);

            if delta.norm() < config.step_tolerance
                || gradient.norm() < config.gradient_tolerance
            {
                status = LmStatus::Converged;
                break;
            }
        } else {
            lambda *= config.lambda_factor;
            if lambda > config.max_lambda {
                break;
            }
        }
    }

    LmResult {
        pose,
        iterations,
        cost: current_cost,
        status,
    }
}

/// Assemble `H = Σ w·Jᵀ A J` and `g = Σ w·Jᵀ A e` at the given pose.
fn build_normal_equations(
    terms: &ResidualSet,
    pose: &Pose,
    base: &Pose,
    undistortion: bool,
) -> (Matrix6<f64>, Vector6<f64>) {
    let rotation = pose.rotation();
    let translation = pose.translation();
    let partials = pose.rotation_partials();
    let interpolator = undistortion.then(|| TransformInterpolator::between(base, pose));

    let mut hessian = Matrix6::zeros();
    let mut gradient = Vector6::zeros();

    for term in &terms.terms {
        let (r_t, t_t) = match &interpolator {
            Some(interp) => interp.at(term.time),
            None => (rotation, translation),
        };
        let error = r_t * term.keypoint + t_t - term.target;

        let scale = if undistortion { term.time } else { 1.0 };
        let mut jacobian = Matrix3x6::<f64>::zeros();
        for axis in 0..3 {
            jacobian.set_column(axis, &(scale * (partials[axis] * term.keypoint)));
        }
        jacobian[(0, 3)] = scale;
        jacobian[(1, 4)] = scale;
        jacobian[(2, 5)] = scale;

        let weighted = term.weight * (jacobian.transpose() * term.weighting);
        hessian += weighted * jacobian;
        gradient += weighted * error;
    }

    (hessian, gradient)
}

/// Total weighted cost of the set at the given pose.
fn evaluate_cost(terms: &ResidualSet, pose: &Pose, base: &Pose, undistortion: bool) -> f64 {
    if undistortion {
        let interp = TransformInterpolator::between(base, pose);
        terms
            .terms
            .iter()
            .map(|term| {
                let (r_t, t_t) = interp.at(term.time);
                term.cost(&r_t, &t_t)
            })
            .sum()
    } else {
        terms.total_cost(&pose.rotation(), &pose.translation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::residual::ResidualTerm;
    use approx::assert_relative_eq;
    use nalgebra::{Matrix3, Vector3};

    fn plane_term(normal: Vector3<f64>, target: Vector3<f64>, keypoint: Vector3<f64>) -> ResidualTerm {
        ResidualTerm {
            weighting: normal * normal.transpose(),
            target,
            keypoint,
            weight: 1.0,
            time: 1.0,
        }
    }

    /// Three orthogonal walls pin down a translation uniquely.
    fn room_terms(offset: Vector3<f64>) -> ResidualSet {
        let mut set = ResidualSet::new();
        let normals: [Vector3<f64>; 3] = [Vector3::x(), Vector3::y(), Vector3::z()];
        for n in normals {
            for a in -2..=2 {
                for b in -2..=2 {
                    // A point on the wall orthogonal to n, displaced by -offset
                    // in the sensor frame.
                    let tangent1 = if n.x.abs() > 0.5 { Vector3::y() } else { Vector3::x() };
                    let tangent2 = n.cross(&tangent1);
                    let on_wall =
                        5.0 * n + a as f64 * tangent1 + b as f64 * tangent2;
                    set.push(plane_term(n, on_wall, on_wall - offset));
                }
            }
        }
        set
    }

    #[test]
    fn test_zero_offset_converges_immediately() {
        let terms = room_terms(Vector3::zeros());
        let result = optimize_pose(&terms, Pose::identity(), &Pose::identity(), &LmConfig::default());
        assert!(result.cost < 1e-16);
        assert!(result.pose.translation_norm() < 1e-8);
    }

    #[test]
    fn test_recovers_translation() {
        let offset = Vector3::new(0.4, -0.2, 0.1);
        let terms = room_terms(offset);
        let result = optimize_pose(&terms, Pose::identity(), &Pose::identity(), &LmConfig::default());
        assert!(
            matches!(result.status, LmStatus::Converged | LmStatus::MaxIterations),
            "unexpected status {:?}",
            result.status
        );
        assert_relative_eq!(result.pose.tx, offset.x, epsilon = 1e-6);
        assert_relative_eq!(result.pose.ty, offset.y, epsilon = 1e-6);
        assert_relative_eq!(result.pose.tz, offset.z, epsilon = 1e-6);
    }

    #[test]
    fn test_recovers_rotation() {
        // Rotate sensor-frame keypoints by -5° about Z; the solver must
        // recover +5° to re-align them with the targets.
        let yaw = 5.0_f64.to_radians();
        let inverse = Pose::new(0.0, 0.0, -yaw, 0.0, 0.0, 0.0);

        let mut set = ResidualSet::new();
        let normals: [Vector3<f64>; 3] = [Vector3::x(), Vector3::y(), Vector3::z()];
        for n in normals {
            for a in -2..=2i32 {
                for b in -2..=2i32 {
                    let tangent1 = if n.x.abs() > 0.5 { Vector3::y() } else { Vector3::x() };
                    let tangent2 = n.cross(&tangent1);
                    let on_wall = 5.0 * n + a as f64 * tangent1 + b as f64 * tangent2;
                    set.push(plane_term(n, on_wall, inverse.transform_point(&on_wall)));
                }
            }
        }

        let result = optimize_pose(&set, Pose::identity(), &Pose::identity(), &LmConfig::default());
        assert_relative_eq!(result.pose.rz, yaw, epsilon = 1e-6);
        assert!(result.pose.translation_norm() < 1e-6);
    }

    #[test]
    fn test_divergence_guard() {
        // Consistent terms demanding a 10 m shift, but a 1 m guard.
        let terms = room_terms(Vector3::new(10.0, 0.0, 0.0));
        let config = LmConfig {
            max_translation_increment: 1.0,
            ..LmConfig::default()
        };
        let result = optimize_pose(&terms, Pose::identity(), &Pose::identity(), &config);
        assert_eq!(result.status, LmStatus::Diverged);
        // The pose is left at the initial estimate.
        assert_relative_eq!(result.pose.translation_norm(), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_system_detected() {
        // All terms share one plane normal: five directions unconstrained.
        let mut set = ResidualSet::new();
        for a in -2..=2i32 {
            for b in -2..=2i32 {
                let on_wall = Vector3::new(a as f64, b as f64, 5.0);
                set.push(plane_term(Vector3::z(), on_wall, on_wall));
            }
        }
        let result = optimize_pose(&set, Pose::identity(), &Pose::identity(), &LmConfig::default());
        assert_eq!(result.status, LmStatus::Singular);
    }

    #[test]
    fn test_empty_terms() {
        let result = optimize_pose(
            &ResidualSet::new(),
            Pose::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            &Pose::identity(),
            &LmConfig::default(),
        );
        assert_eq!(result.status, LmStatus::Converged);
        assert_relative_eq!(result.pose.tx, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_undistorted_constant_velocity_fit() {
        // Keypoints taken at increasing times under constant velocity along X.
        // With undistortion the solver can drive the cost to ~0 with the true
        // end-of-sweep translation.
        let velocity = Vector3::new(0.5, 0.0, 0.0);
        let mut set = ResidualSet::new();
        let normals: [Vector3<f64>; 3] = [Vector3::x(), Vector3::y(), Vector3::z()];
        for n in normals {
            for a in -2..=2i32 {
                for b in -2..=2i32 {
                    let tangent1 = if n.x.abs() > 0.5 { Vector3::y() } else { Vector3::x() };
                    let tangent2 = n.cross(&tangent1);
                    let on_wall = 5.0 * n + a as f64 * tangent1 + b as f64 * tangent2;
                    let time = 0.5 + 0.5 * (a as f64 / 4.0);
                    // Sensor has moved by time·velocity when the point was taken.
                    let keypoint = on_wall - time * velocity;
                    let mut term = plane_term(n, on_wall, keypoint);
                    term.time = time;
                    set.push(term);
                }
            }
        }

        let config = LmConfig {
            undistortion: true,
            ..LmConfig::default()
        };
        let result = optimize_pose(&set, Pose::identity(), &Pose::identity(), &config);
        assert_relative_eq!(result.pose.tx, velocity.x, epsilon = 1e-6);

        // Without undistortion the same terms cannot be driven as low.
        let plain = optimize_pose(&set, Pose::identity(), &Pose::identity(), &LmConfig::default());
        assert!(result.cost < plain.cost);
    }
}
