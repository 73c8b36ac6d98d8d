//! Constant-velocity pose smoothing.
//!
//! A linear Kalman filter over the 12-dimensional state (pose parameters and
//! their velocities) that consumes the per-sweep world poses. It is a
//! downstream consumer of the estimator's output and takes no part in the
//! odometry pipeline itself.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::core::Pose;

type State = SVector<f64, 12>;
type StateCov = SMatrix<f64, 12, 12>;
type Measurement = SVector<f64, 6>;
type MeasurementCov = SMatrix<f64, 6, 6>;
type Observation = SMatrix<f64, 6, 12>;

/// Configuration of the pose smoother.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoseSmootherConfig {
    /// Process noise density on the velocity states.
    /// Default: 1.0
    pub process_noise: f64,

    /// Measurement noise variance on the pose parameters.
    /// Default: 1e-2
    pub measurement_noise: f64,
}

impl Default for PoseSmootherConfig {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 1e-2,
        }
    }
}

/// Constant-velocity Kalman filter over pose estimates.
#[derive(Debug, Clone)]
pub struct PoseSmoother {
    config: PoseSmootherConfig,
    state: State,
    covariance: StateCov,
    initialized: bool,
}

impl PoseSmoother {
    /// Create a smoother with the given configuration.
    pub fn new(config: PoseSmootherConfig) -> Self {
        Self {
            config,
            state: State::zeros(),
            covariance: StateCov::identity(),
            initialized: false,
        }
    }

    /// Whether at least one measurement has been consumed.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The current velocity estimate of the six pose parameters.
    pub fn velocity(&self) -> [f64; 6] {
        let mut v = [0.0; 6];
        for i in 0..6 {
            v[i] = self.state[6 + i];
        }
        v
    }

    /// Feed one pose measurement taken `dt` seconds after the previous one
    /// and return the smoothed pose.
    ///
    /// The first call initializes the filter and returns the measurement
    /// unchanged.
    pub fn smooth(&mut self, measurement: &Pose, dt: f64) -> Pose {
        let z = Measurement::from_column_slice(&measurement.params());

        if !self.initialized {
            self.state = State::zeros();
            for i in 0..6 {
                self.state[i] = z[i];
            }
            self.covariance = StateCov::identity();
            self.initialized = true;
            return *measurement;
        }

        let dt = dt.max(0.0);

        // Predict with the constant-velocity transition.
        let mut transition = StateCov::identity();
        for i in 0..6 {
            transition[(i, 6 + i)] = dt;
        }
        let mut process = StateCov::zeros();
        let q = self.config.process_noise;
        for i in 0..6 {
            // Velocity random walk, integrated into the pose block.
            process[(i, i)] = q * dt * dt * dt / 3.0;
            process[(i, 6 + i)] = q * dt * dt / 2.0;
            process[(6 + i, i)] = q * dt * dt / 2.0;
            process[(6 + i, 6 + i)] = q * dt;
        }
        self.state = transition * self.state;
        self.covariance = transition * self.covariance * transition.transpose() + process;

        // Update with the measured pose.
        let mut observation = Observation::zeros();
        for i in 0..6 {
            observation[(i, i)] = 1.0;
        }
        let innovation = z - observation * self.state;
        let innovation_cov: MeasurementCov = observation
            * self.covariance
            * observation.transpose()
            + MeasurementCov::identity() * self.config.measurement_noise;

        let Some(cholesky) = innovation_cov.cholesky() else {
            // Numerically degenerate update; keep the prediction.
            return Pose::from_params(&[
                self.state[0],
                self.state[1],
                self.state[2],
                self.state[3],
                self.state[4],
                self.state[5],
            ]);
        };
        let gain = self.covariance * observation.transpose() * cholesky.inverse();
        self.state += gain * innovation;
        self.covariance = (StateCov::identity() - gain * observation) * self.covariance;

        Pose::from_params(&[
            self.state[0],
            self.state[1],
            self.state[2],
            self.state[3],
            self.state[4],
            self.state[5],
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_first_measurement_passthrough() {
        let mut smoother = PoseSmoother::new(PoseSmootherConfig::default());
        let pose = Pose::new(0.0, 0.0, 0.1, 1.0, 2.0, 0.0);
        let out = smoother.smooth(&pose, 0.1);
        assert_relative_eq!(out.tx, 1.0, epsilon = 1e-12);
        assert!(smoother.is_initialized());
    }

    #[test]
    fn test_tracks_constant_velocity() {
        let mut smoother = PoseSmoother::new(PoseSmootherConfig::default());
        let dt = 0.1;
        let mut last = Pose::identity();
        for k in 0..50 {
            let truth = Pose::new(0.0, 0.0, 0.0, 0.5 * k as f64 * dt, 0.0, 0.0);
            last = smoother.smooth(&truth, dt);
        }
        // After convergence the filter tracks the ramp closely and has
        // learned the velocity.
        assert_relative_eq!(last.tx, 0.5 * 49.0 * 0.1, epsilon = 0.05);
        assert_relative_eq!(smoother.velocity()[3], 0.5, epsilon = 0.1);
    }

    #[test]
    fn test_smooths_noise() {
        let mut noisy = PoseSmoother::new(PoseSmootherConfig {
            process_noise: 0.1,
            measurement_noise: 0.05,
        });
        let dt = 0.1;
        let mut errors = 0.0;
        let mut raw_errors = 0.0;
        for k in 0..100 {
            let truth = 0.2 * k as f64 * dt;
            let noise = 0.05 * ((k * 37) as f64).sin();
            let measured = Pose::new(0.0, 0.0, 0.0, truth + noise, 0.0, 0.0);
            let smoothed = noisy.smooth(&measured, dt);
            if k > 20 {
                errors += (smoothed.tx - truth).abs();
                raw_errors += noise.abs();
            }
        }
        assert!(
            errors < raw_errors,
            "smoothed error {errors} should beat raw {raw_errors}"
        );
    }
}
