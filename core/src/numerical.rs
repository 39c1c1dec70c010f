//! Central-difference Jacobians for verifying analytic derivatives
//!
//! Every analytic Jacobian in this crate (propagation matrices, bias sensitivities, factor
//! Jacobians, tangent-space update Jacobians) is checked against these finite differences.
//! Functions on manifolds are handled by the caller: the closure retracts the perturbation
//! onto the manifold before evaluating and, if its output lives on a manifold, returns local
//! coordinates of the output relative to the nominal value.
use nalgebra::{SMatrix, SVector};

/// Default perturbation size for central differences
pub const DEFAULT_STEP: f64 = 1e-5;

/// Compute the Jacobian of `f` at `x` with central differences
///
/// # Arguments
/// * `f` - function from $\mathbb{R}^N$ to $\mathbb{R}^M$
/// * `x` - linearization point
/// * `step` - perturbation size applied to each input coordinate
///
/// # Example
/// ```rust
/// use nalgebra::Vector2;
/// use preintegration::numerical::{numerical_jacobian, DEFAULT_STEP};
/// let jac = numerical_jacobian(
///     |x: &Vector2<f64>| Vector2::new(x[0] * x[1], x[0] + 3.0 * x[1]),
///     &Vector2::new(2.0, 5.0),
///     DEFAULT_STEP,
/// );
/// assert!((jac[(0, 0)] - 5.0).abs() < 1e-8);
/// assert!((jac[(1, 1)] - 3.0).abs() < 1e-8);
/// ```
pub fn numerical_jacobian<const M: usize, const N: usize, F>(
    f: F,
    x: &SVector<f64, N>,
    step: f64,
) -> SMatrix<f64, M, N>
where
    F: Fn(&SVector<f64, N>) -> SVector<f64, M>,
{
    let mut jac = SMatrix::<f64, M, N>::zeros();
    for j in 0..N {
        let mut x_plus = *x;
        let mut x_minus = *x;
        x_plus[j] += step;
        x_minus[j] -= step;
        let column = (f(&x_plus) - f(&x_minus)) / (2.0 * step);
        jac.set_column(j, &column);
    }
    jac
}
