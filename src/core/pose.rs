//! Six-degree-of-freedom sensor pose.
//!
//! A pose is stored as its six parameters `(rx, ry, rz, tx, ty, tz)` with the
//! rotation composed intrinsically as `R = Rz(rz) · Ry(ry) · Rx(rx)`. The
//! same convention is used everywhere: by the pose estimator, its analytic
//! Jacobians, and the reported world transform.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Sensor pose as six parameters: rotation `(rx, ry, rz)` applied Z·Y·X,
/// then translation `(tx, ty, tz)`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    /// Rotation about X (radians), applied innermost.
    pub rx: f64,
    /// Rotation about Y (radians).
    pub ry: f64,
    /// Rotation about Z (radians), applied outermost.
    pub rz: f64,
    /// Translation along X (meters).
    pub tx: f64,
    /// Translation along Y (meters).
    pub ty: f64,
    /// Translation along Z (meters).
    pub tz: f64,
}

impl Pose {
    /// Create a pose from its six parameters.
    #[inline]
    pub fn new(rx: f64, ry: f64, rz: f64, tx: f64, ty: f64, tz: f64) -> Self {
        Self {
            rx,
            ry,
            rz,
            tx,
            ty,
            tz,
        }
    }

    /// The identity pose.
    #[inline]
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build a pose from a rotation matrix and a translation vector.
    ///
    /// The Euler angles are extracted with the same Z·Y·X convention used by
    /// [`Pose::rotation`], so `Pose::from_parts(p.rotation(), p.translation())`
    /// round-trips.
    pub fn from_parts(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let (rx, ry, rz) = Rotation3::from_matrix_unchecked(*rotation).euler_angles();
        Self::new(rx, ry, rz, translation.x, translation.y, translation.z)
    }

    /// The rotation matrix `Rz(rz) · Ry(ry) · Rx(rx)`.
    #[inline]
    pub fn rotation(&self) -> Matrix3<f64> {
        *Rotation3::from_euler_angles(self.rx, self.ry, self.rz).matrix()
    }

    /// The rotation as a unit quaternion (same Z·Y·X convention).
    #[inline]
    pub fn unit_quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_euler_angles(self.rx, self.ry, self.rz)
    }

    /// The translation vector.
    #[inline]
    pub fn translation(&self) -> Vector3<f64> {
        Vector3::new(self.tx, self.ty, self.tz)
    }

    /// Norm of the translation component.
    #[inline]
    pub fn translation_norm(&self) -> f64 {
        self.translation().norm()
    }

    /// Apply this pose to a point: `R·p + t`.
    #[inline]
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation() * point + self.translation()
    }

    /// Compose two poses: `self ∘ other` applies `other` first.
    pub fn compose(&self, other: &Pose) -> Pose {
        let r = self.rotation() * other.rotation();
        let t = self.rotation() * other.translation() + self.translation();
        Pose::from_parts(&r, &t)
    }

    /// The inverse pose.
    pub fn inverse(&self) -> Pose {
        let r_inv = self.rotation().transpose();
        let t_inv = -(r_inv * self.translation());
        Pose::from_parts(&r_inv, &t_inv)
    }

    /// Analytic partial derivatives of the rotation matrix with respect to
    /// `rx`, `ry`, `rz`, in that order.
    ///
    /// With `R = Rz · Ry · Rx` the partials are the products with one factor
    /// replaced by its derivative, e.g. `∂R/∂rx = Rz · Ry · ∂Rx/∂rx`.
    pub fn rotation_partials(&self) -> [Matrix3<f64>; 3] {
        let (sx, cx) = self.rx.sin_cos();
        let (sy, cy) = self.ry.sin_cos();
        let (sz, cz) = self.rz.sin_cos();

        let rot_x = Matrix3::new(1.0, 0.0, 0.0, 0.0, cx, -sx, 0.0, sx, cx);
        let rot_y = Matrix3::new(cy, 0.0, sy, 0.0, 1.0, 0.0, -sy, 0.0, cy);
        let rot_z = Matrix3::new(cz, -sz, 0.0, sz, cz, 0.0, 0.0, 0.0, 1.0);

        let d_rot_x = Matrix3::new(0.0, 0.0, 0.0, 0.0, -sx, -cx, 0.0, cx, -sx);
        let d_rot_y = Matrix3::new(-sy, 0.0, cy, 0.0, 0.0, 0.0, -cy, 0.0, -sy);
        let d_rot_z = Matrix3::new(-sz, -cz, 0.0, cz, -sz, 0.0, 0.0, 0.0, 0.0);

        [
            rot_z * rot_y * d_rot_x,
            rot_z * d_rot_y * rot_x,
            d_rot_z * rot_y * rot_x,
        ]
    }

    /// The six parameters as an array `[rx, ry, rz, tx, ty, tz]`.
    #[inline]
    pub fn params(&self) -> [f64; 6] {
        [self.rx, self.ry, self.rz, self.tx, self.ty, self.tz]
    }

    /// Build a pose from a parameter array `[rx, ry, rz, tx, ty, tz]`.
    #[inline]
    pub fn from_params(p: &[f64; 6]) -> Self {
        Self::new(p[0], p[1], p[2], p[3], p[4], p[5])
    }
}
