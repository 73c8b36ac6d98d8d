//! Time-parameterized rigid-motion interpolation.
//!
//! Used for per-point undistortion: a point acquired at sweep-relative time
//! `t` is transformed by the pose interpolated at `t` instead of the
//! end-of-sweep pose. Rotation interpolates by SLERP on unit quaternions,
//! translation linearly.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

use crate::core::Pose;

/// Rigid interpolator between two poses over `t ∈ [0, 1]`.
#[derive(Debug, Clone)]
pub struct TransformInterpolator {
    start_rotation: UnitQuaternion<f64>,
    end_rotation: UnitQuaternion<f64>,
    start_translation: Vector3<f64>,
    end_translation: Vector3<f64>,
}

impl TransformInterpolator {
    /// Interpolate between two poses: `start` at t = 0, `end` at t = 1.
    pub fn between(start: &Pose, end: &Pose) -> Self {
        Self {
            start_rotation: start.unit_quaternion(),
            end_rotation: end.unit_quaternion(),
            start_translation: start.translation(),
            end_translation: end.translation(),
        }
    }

    /// Interpolate between the identity and `end`.
    pub fn from_identity_to(end: &Pose) -> Self {
        Self::between(&Pose::identity(), end)
    }

    /// The interpolated rigid transform at `time` (clamped to [0, 1]).
    pub fn at(&self, time: f64) -> (Matrix3<f64>, Vector3<f64>) {
        let t = time.clamp(0.0, 1.0);
        let rotation = self
            .start_rotation
            .try_slerp(&self.end_rotation, t, 1e-9)
            .unwrap_or_else(|| {
                // Antipodal rotations cannot occur for within-sweep motion;
                // snap to the nearer endpoint if they somehow do.
                if t < 0.5 {
                    self.start_rotation
                } else {
                    self.end_rotation
                }
            });
        let translation =
            self.start_translation + t * (self.end_translation - self.start_translation);
        (*rotation.to_rotation_matrix().matrix(), translation)
    }

    /// Apply the interpolated transform at `time` to a point.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>, time: f64) -> Vector3<f64> {
        let (rotation, translation) = self.at(time);
        rotation * point + translation
    }
}
