//! Rigid-body pose used for the factor endpoints and the sensor mounting offset
//!
//! The tangent space of a [`Pose3`] is ordered `[rotation, translation]` and the retraction
//! perturbs the rotation on the right and the translation in the body frame:
//!
//! $$
//! (R, t) \oplus (\omega, v) = (R\,\mathrm{Exp}(\omega),\; t + R\,v)
//! $$
//!
//! This matches the first-order behavior of the full SE(3) exponential at the linearization
//! point, which is all the factor Jacobians rely on.
use nalgebra::{Rotation3, Vector3, Vector6};
use std::fmt::{self, Display};

use crate::so3::{exp_map, log_map};

/// A rigid-body transform (body-to-world rotation and position)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose3 {
    /// Rotation of the body frame with respect to the world frame
    pub rotation: Rotation3<f64>,
    /// Position of the body origin expressed in the world frame
    pub translation: Vector3<f64>,
}
impl Default for Pose3 {
    fn default() -> Self {
        Pose3::identity()
    }
}
impl Display for Pose3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (roll, pitch, yaw) = self.rotation.euler_angles();
        write!(
            f,
            "Pose3 {{ rpy: [{:.4}, {:.4}, {:.4}], t: [{:.4}, {:.4}, {:.4}] }}",
            roll,
            pitch,
            yaw,
            self.translation[0],
            self.translation[1],
            self.translation[2]
        )
    }
}
impl Pose3 {
    pub fn new(rotation: Rotation3<f64>, translation: Vector3<f64>) -> Self {
        Pose3 {
            rotation,
            translation,
        }
    }
    pub fn identity() -> Self {
        Pose3 {
            rotation: Rotation3::identity(),
            translation: Vector3::zeros(),
        }
    }
    /// Build a pose from XYZ Euler angles (radians) and a translation
    pub fn from_euler_translation(roll: f64, pitch: f64, yaw: f64, translation: Vector3<f64>) -> Self {
        Pose3 {
            rotation: Rotation3::from_euler_angles(roll, pitch, yaw),
            translation,
        }
    }
    /// Apply a tangent-space perturbation `[ω, v]`
    pub fn retract(&self, xi: &Vector6<f64>) -> Self {
        let omega = xi.fixed_rows::<3>(0).into_owned();
        let v = xi.fixed_rows::<3>(3).into_owned();
        Pose3 {
            rotation: self.rotation * Rotation3::from_matrix_unchecked(exp_map(&omega)),
            translation: self.translation + self.rotation * v,
        }
    }
    /// Inverse of [`Pose3::retract`]: the perturbation taking `self` to `other`
    pub fn local_coordinates(&self, other: &Pose3) -> Vector6<f64> {
        let omega = log_map((self.rotation.inverse() * other.rotation).matrix());
        let v = self.rotation.inverse() * (other.translation - self.translation);
        Vector6::new(omega[0], omega[1], omega[2], v[0], v[1], v[2])
    }
    /// Compose two transforms, `self * other`
    pub fn compose(&self, other: &Pose3) -> Self {
        Pose3 {
            rotation: self.rotation * other.rotation,
            translation: self.translation + self.rotation * other.translation,
        }
    }
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Pose3 {
            rotation,
            translation: -(rotation * self.translation),
        }
    }
    /// Relative transform `self⁻¹ * other`
    pub fn between(&self, other: &Pose3) -> Self {
        self.inverse().compose(other)
    }
    /// Map a point from the body frame into the world frame
    pub fn transform_from(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * point + self.translation
    }
}
