//! Rotation group (SO(3)) primitives used by the preintegration recursion
//!
//! This module provides the small set of manifold operations the engine and the factor
//! need: the hat/vee operators, the exponential and logarithm maps, the right Jacobian of
//! the exponential map and its inverse, and the derivative of the right Jacobian applied to
//! a fixed vector (used by the tangent-space update).
//!
//! # Conventions
//!
//! Rotation vectors $\phi \in \mathbb{R}^3$ are mapped to rotations with
//! $R = \mathrm{Exp}(\phi)$. The right Jacobian $J_r(\phi)$ is defined by the first-order
//! relation
//!
//! $$
//! \mathrm{Exp}(\phi + \delta\phi) \approx \mathrm{Exp}(\phi)\,\mathrm{Exp}(J_r(\phi)\,\delta\phi)
//! $$
//!
//! and its inverse gives $\mathrm{Log}(\mathrm{Exp}(\phi)\,\mathrm{Exp}(\delta\phi)) \approx \phi + J_r^{-1}(\phi)\,\delta\phi$.
//!
//! # Representation independence
//!
//! The [`So3`] trait is the narrow interface through which the preintegration recursion
//! touches rotations. It is implemented for both [`Rotation3`] (matrix) and
//! [`UnitQuaternion`] so either representation can be used to accumulate the relative
//! rotation without changing any covariance or Jacobian math.
//!
//! The formulas are accurate for small-to-moderate rotation magnitudes. Near $\|\phi\| = 2\pi$
//! the inverse right Jacobian is singular; this is an accepted accuracy limitation since
//! inter-sample rotations are assumed to be small.
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use std::fmt::Debug;

/// Below this angle (radians) the series expansions are used in place of the closed forms.
const SMALL_ANGLE_THRESHOLD: f64 = 1e-4;
/// Below this value of sin(θ) with cos(θ) < 0 the logarithm falls back to the symmetric part.
const NEAR_PI_THRESHOLD: f64 = 1e-6;
/// The derivative coefficients cancel to fourth/fifth order, so they switch to series earlier.
const DERIVATIVE_SERIES_THRESHOLD: f64 = 1e-2;

/// Convert a three-element vector to its skew-symmetric (hat) matrix
///
/// $$
/// x = \begin{bmatrix} a \\\\ b \\\\ c \end{bmatrix} \rightarrow X = \begin{bmatrix} 0 & -c & b \\\\ c & 0 & -a \\\\ -b & a & 0 \end{bmatrix}
/// $$
///
/// # Example
/// ```rust
/// use nalgebra::Vector3;
/// use preintegration::so3;
/// let v = Vector3::new(1.0, 2.0, 3.0);
/// let u = Vector3::new(-1.0, 0.5, 2.0);
/// assert!((so3::vector_to_skew_symmetric(&v) * u - v.cross(&u)).norm() < 1e-12);
/// ```
pub fn vector_to_skew_symmetric(v: &Vector3<f64>) -> Matrix3<f64> {
    let mut skew: Matrix3<f64> = Matrix3::zeros();
    skew[(0, 1)] = -v[2];
    skew[(0, 2)] = v[1];
    skew[(1, 0)] = v[2];
    skew[(1, 2)] = -v[0];
    skew[(2, 0)] = -v[1];
    skew[(2, 1)] = v[0];
    skew
}
/// Convert a skew-symmetric matrix back to its three-element vector (vee)
pub fn skew_symmetric_to_vector(skew: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(skew[(2, 1)], skew[(0, 2)], skew[(1, 0)])
}
/// Exponential map from a rotation vector to a rotation matrix
///
/// $$
/// \mathrm{Exp}(\phi) = I + \frac{\sin\theta}{\theta}[\phi]_\times + \frac{1-\cos\theta}{\theta^2}[\phi]_\times^2, \quad \theta = \|\phi\|
/// $$
pub fn exp_map(phi: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::from_scaled_axis(*phi).into_inner()
}
/// Logarithm map from a rotation matrix to its rotation vector
///
/// The angle is recovered with `atan2` of the antisymmetric and trace parts, which keeps
/// full precision for small angles where `Rotation3::scaled_axis` goes through `acos`. Rotations within numerical noise of π fall back to the
/// symmetric part of the matrix, choosing the sign that agrees with the antisymmetric part.
pub fn log_map(r: &Matrix3<f64>) -> Vector3<f64> {
    let w = Vector3::new(
        r[(2, 1)] - r[(1, 2)],
        r[(0, 2)] - r[(2, 0)],
        r[(1, 0)] - r[(0, 1)],
    );
    let sin_theta = 0.5 * w.norm();
    let cos_theta = (0.5 * (r.trace() - 1.0)).clamp(-1.0, 1.0);
    if cos_theta < 0.0 && sin_theta < NEAR_PI_THRESHOLD {
        // R ≈ 2nnᵀ - I, use the best conditioned column of R + I
        let k = (0..3)
            .max_by(|&a, &b| r[(a, a)].total_cmp(&r[(b, b)]))
            .unwrap_or(0);
        let column: Vector3<f64> = (r + Matrix3::identity()).column(k).clone_owned();
        let mut axis = column.normalize();
        if axis.dot(&w) < 0.0 {
            axis = -axis;
        }
        return axis * sin_theta.atan2(cos_theta);
    }
    let theta = sin_theta.atan2(cos_theta);
    let scale = if theta < SMALL_ANGLE_THRESHOLD {
        0.5 + theta * theta / 12.0
    } else {
        theta / (2.0 * sin_theta)
    };
    w * scale
}
/// Right Jacobian of the exponential map
///
/// $$
/// J_r(\phi) = I - \frac{1-\cos\theta}{\theta^2}[\phi]_\times + \frac{\theta-\sin\theta}{\theta^3}[\phi]_\times^2
/// $$
pub fn right_jacobian(phi: &Vector3<f64>) -> Matrix3<f64> {
    let (alpha, beta) = right_jacobian_coefficients(phi.norm());
    let w = vector_to_skew_symmetric(phi);
    Matrix3::identity() - alpha * w + beta * w * w
}
/// Inverse of the right Jacobian of the exponential map
///
/// $$
/// J_r^{-1}(\phi) = I + \frac{1}{2}[\phi]_\times + \left(\frac{1}{\theta^2} - \frac{1+\cos\theta}{2\theta\sin\theta}\right)[\phi]_\times^2
/// $$
pub fn right_jacobian_inverse(phi: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let gamma = if theta < SMALL_ANGLE_THRESHOLD {
        1.0 / 12.0 + theta * theta / 720.0
    } else {
        1.0 / (theta * theta) - (1.0 + theta.cos()) / (2.0 * theta * theta.sin())
    };
    let w = vector_to_skew_symmetric(phi);
    Matrix3::identity() + 0.5 * w + gamma * w * w
}
/// Derivative of `J_r(phi) * v` with respect to `phi`, holding `v` fixed
///
/// Writing $J_r(\phi)v = v - \alpha(\theta)[\phi]_\times v + \beta(\theta)[\phi]_\times^2 v$, the
/// product rule gives
///
/// $$
/// \frac{\partial J_r(\phi)v}{\partial\phi} = \alpha[v]_\times - \beta\left([\phi\times v]_\times + [\phi]_\times[v]_\times\right)
/// - \frac{\alpha'}{\theta}([\phi]_\times v)\phi^T + \frac{\beta'}{\theta}([\phi]_\times^2 v)\phi^T
/// $$
pub fn right_jacobian_derivative(phi: &Vector3<f64>, v: &Vector3<f64>) -> Matrix3<f64> {
    let theta = phi.norm();
    let (alpha, beta) = right_jacobian_coefficients(theta);
    // α'(θ)/θ and β'(θ)/θ
    let (d_alpha, d_beta) = if theta < DERIVATIVE_SERIES_THRESHOLD {
        let theta2 = theta * theta;
        (-1.0 / 12.0 + theta2 / 180.0, -1.0 / 60.0 + theta2 / 1260.0)
    } else {
        let (sin_theta, cos_theta) = theta.sin_cos();
        let theta4 = theta.powi(4);
        (
            (theta * sin_theta - 2.0 * (1.0 - cos_theta)) / theta4,
            ((1.0 - cos_theta) * theta - 3.0 * (theta - sin_theta)) / (theta4 * theta),
        )
    };
    let w = vector_to_skew_symmetric(phi);
    let wv = w * v;
    let wwv = w * wv;
    let v_skew = vector_to_skew_symmetric(v);
    alpha * v_skew - beta * (vector_to_skew_symmetric(&wv) + w * v_skew)
        - d_alpha * wv * phi.transpose()
        + d_beta * wwv * phi.transpose()
}
/// Coefficients (α, β) of the right Jacobian: (1 - cos θ)/θ² and (θ - sin θ)/θ³
fn right_jacobian_coefficients(theta: f64) -> (f64, f64) {
    if theta < SMALL_ANGLE_THRESHOLD {
        let theta2 = theta * theta;
        (0.5 - theta2 / 24.0, 1.0 / 6.0 - theta2 / 120.0)
    } else {
        let half_sin = (0.5 * theta).sin();
        let theta2 = theta * theta;
        (
            2.0 * half_sin * half_sin / theta2,
            (theta - theta.sin()) / (theta2 * theta),
        )
    }
}

/// Narrow rotation-group interface consumed by the preintegration recursion
///
/// Implementors only need to provide the group structure and the exponential/logarithm
/// maps; Jacobians are computed from rotation vectors by the free functions of this module
/// and are therefore independent of the representation.
pub trait So3: Copy + Debug + Send + Sync + 'static {
    /// Identity rotation
    fn identity() -> Self;
    /// Exponential map of a rotation vector
    fn exp(phi: &Vector3<f64>) -> Self;
    /// Logarithm map to a rotation vector
    fn log(&self) -> Vector3<f64>;
    /// Group composition `self * other`
    fn compose(&self, other: &Self) -> Self;
    /// Group inverse
    fn inverse(&self) -> Self;
    /// Equivalent direction cosine matrix
    fn matrix(&self) -> Matrix3<f64>;
    /// Rotate a vector
    fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self.matrix() * v
    }
    /// Relative rotation `self⁻¹ * other`
    fn between(&self, other: &Self) -> Self {
        self.inverse().compose(other)
    }
}

impl So3 for Rotation3<f64> {
    fn identity() -> Self {
        Rotation3::identity()
    }
    fn exp(phi: &Vector3<f64>) -> Self {
        Rotation3::from_scaled_axis(*phi)
    }
    fn log(&self) -> Vector3<f64> {
        log_map(self.matrix())
    }
    fn compose(&self, other: &Self) -> Self {
        self * other
    }
    fn inverse(&self) -> Self {
        Rotation3::inverse(self)
    }
    fn matrix(&self) -> Matrix3<f64> {
        *Rotation3::matrix(self)
    }
    fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self * v
    }
}

impl So3 for UnitQuaternion<f64> {
    fn identity() -> Self {
        UnitQuaternion::identity()
    }
    fn exp(phi: &Vector3<f64>) -> Self {
        UnitQuaternion::from_scaled_axis(*phi)
    }
    fn log(&self) -> Vector3<f64> {
        let q = self.quaternion();
        // q and -q are the same rotation, take the short way around
        let (w, v) = if q.w < 0.0 {
            (-q.w, -q.imag())
        } else {
            (q.w, q.imag())
        };
        let n = v.norm();
        if n < 1e-10 {
            v * (2.0 / w)
        } else {
            v * (2.0 * n.atan2(w) / n)
        }
    }
    fn compose(&self, other: &Self) -> Self {
        UnitQuaternion::new_normalize((self * other).into_inner())
    }
    fn inverse(&self) -> Self {
        UnitQuaternion::inverse(self)
    }
    fn matrix(&self) -> Matrix3<f64> {
        self.to_rotation_matrix().into_inner()
    }
    fn rotate(&self, v: &Vector3<f64>) -> Vector3<f64> {
        self * v
    }
}
