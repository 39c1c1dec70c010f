//! Tangent-space form of the per-sample preintegration update
//!
//! Here the rotation increment is kept as a rotation vector, so the whole increment is a plain
//! 9-vector `zeta = [p, v, θ]`:
//!
//! $$
//! \begin{aligned}
//! \theta^+ &= \theta + J_r^{-1}(\theta)\,\omega\,\Delta t \\\\
//! p^+ &= p + v\,\Delta t + \tfrac{1}{2}\mathrm{Exp}(\theta)\,a\,\Delta t^2 \\\\
//! v^+ &= v + \mathrm{Exp}(\theta)\,a\,\Delta t
//! \end{aligned}
//! $$
//!
//! Unlike the manifold recursion, the Jacobians of this map are exact rather than first-order,
//! which makes it a convenient reference when validating covariance propagation.
use nalgebra::{Matrix3, Vector3};

use crate::so3::{
    exp_map, right_jacobian, right_jacobian_derivative, right_jacobian_inverse,
    vector_to_skew_symmetric,
};
use crate::{Matrix9, Matrix93, Vector9};

/// Jacobians of [`update_estimate`] with respect to each of its inputs
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TangentJacobians {
    /// ∂zeta⁺/∂zeta
    pub zeta: Matrix9,
    /// ∂zeta⁺/∂acc
    pub acc: Matrix93,
    /// ∂zeta⁺/∂omega
    pub omega: Matrix93,
}

/// Advance `zeta = [p, v, θ]` by one bias-corrected sample
pub fn update_estimate(zeta: &Vector9, acc: &Vector3<f64>, omega: &Vector3<f64>, dt: f64) -> Vector9 {
    let p = zeta.fixed_rows::<3>(0);
    let v = zeta.fixed_rows::<3>(3);
    let theta: Vector3<f64> = zeta.fixed_rows::<3>(6).into_owned();
    let r = exp_map(&theta);
    let vel_incr = r * acc * dt;
    let mut next = Vector9::zeros();
    next.fixed_rows_mut::<3>(0)
        .copy_from(&(p + v * dt + 0.5 * vel_incr * dt));
    next.fixed_rows_mut::<3>(3).copy_from(&(v + vel_incr));
    next.fixed_rows_mut::<3>(6)
        .copy_from(&(theta + right_jacobian_inverse(&theta) * omega * dt));
    next
}

/// [`update_estimate`] together with its exact Jacobians
pub fn update_estimate_with_jacobians(
    zeta: &Vector9,
    acc: &Vector3<f64>,
    omega: &Vector3<f64>,
    dt: f64,
) -> (Vector9, TangentJacobians) {
    let next = update_estimate(zeta, acc, omega, dt);
    let theta: Vector3<f64> = zeta.fixed_rows::<3>(6).into_owned();
    let r = exp_map(&theta);
    let jr_inv = right_jacobian_inverse(&theta);
    let vel_h_theta = -r * vector_to_skew_symmetric(acc) * right_jacobian(&theta) * dt;
    // Jr(θ)·u = ω with u = Jr⁻¹(θ)ω, differentiate both sides
    let u = jr_inv * omega;
    let rate_h_theta = -jr_inv * right_jacobian_derivative(&theta, &u);

    let mut d_zeta = Matrix9::identity();
    d_zeta
        .fixed_view_mut::<3, 3>(0, 3)
        .copy_from(&(Matrix3::identity() * dt));
    d_zeta
        .fixed_view_mut::<3, 3>(0, 6)
        .copy_from(&(0.5 * vel_h_theta * dt));
    d_zeta.fixed_view_mut::<3, 3>(3, 6).copy_from(&vel_h_theta);
    d_zeta
        .fixed_view_mut::<3, 3>(6, 6)
        .copy_from(&(Matrix3::identity() + rate_h_theta * dt));

    let mut d_acc = Matrix93::zeros();
    d_acc.fixed_view_mut::<3, 3>(0, 0).copy_from(&(0.5 * r * dt * dt));
    d_acc.fixed_view_mut::<3, 3>(3, 0).copy_from(&(r * dt));

    let mut d_omega = Matrix93::zeros();
    d_omega.fixed_view_mut::<3, 3>(6, 0).copy_from(&(jr_inv * dt));

    (
        next,
        TangentJacobians {
            zeta: d_zeta,
            acc: d_acc,
            omega: d_omega,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bias::ConstantBias;
    use crate::numerical::{DEFAULT_STEP, numerical_jacobian};
    use crate::params::PreintegrationParams;
    use crate::preintegration::PreintegratedMeasurements;
    use rand::Rng;

    fn check(zeta: &Vector9, acc: &Vector3<f64>, omega: &Vector3<f64>, dt: f64, tol: f64) {
        let (_, jac) = update_estimate_with_jacobians(zeta, acc, omega, dt);
        let d_zeta = numerical_jacobian(|z: &Vector9| update_estimate(z, acc, omega, dt), zeta, DEFAULT_STEP);
        let d_acc = numerical_jacobian(|a: &Vector3<f64>| update_estimate(zeta, a, omega, dt), acc, DEFAULT_STEP);
        let d_omega =
            numerical_jacobian(|w: &Vector3<f64>| update_estimate(zeta, acc, w, dt), omega, DEFAULT_STEP);
        let errors = [
            (jac.zeta - d_zeta).abs().max(),
            (jac.acc - d_acc).abs().max(),
            (jac.omega - d_omega).abs().max(),
        ];
        eprintln!("tangent jacobian errors {errors:?}");
        for err in errors {
            assert!(err < tol, "tangent jacobian mismatch {err}");
        }
    }

    #[test]
    fn jacobians_near_zero() {
        check(
            &Vector9::zeros(),
            &Vector3::new(0.1, 0.2, 10.0),
            &Vector3::new(0.1, 0.2, 0.3),
            0.1,
            1e-9,
        );
    }
    #[test]
    fn jacobians_far_from_zero() {
        let zeta = Vector9::from_column_slice(&[100.0, 200.0, 300.0, 10.0, 5.0, 3.0, 0.01, 0.02, 0.03]);
        check(&zeta, &Vector3::new(0.1, 0.2, 10.0), &Vector3::new(0.1, 0.2, 0.3), 0.1, 1e-6);
    }
    #[test]
    fn jacobians_random_states() {
        let mut rng = rand::rng();
        for _ in 0..20 {
            let zeta = Vector9::from_fn(|i, _| {
                if i < 6 {
                    rng.random_range(-5.0..5.0)
                } else {
                    rng.random_range(-1.0..1.0)
                }
            });
            let acc = Vector3::from_fn(|_, _| rng.random_range(-10.0..10.0));
            let omega = Vector3::from_fn(|_, _| rng.random_range(-2.0..2.0));
            check(&zeta, &acc, &omega, 0.01, 1e-7);
        }
    }
    #[test]
    fn agrees_with_manifold_recursion() {
        let params = PreintegrationParams::default();
        let mut pim = PreintegratedMeasurements::<nalgebra::Rotation3<f64>>::new(params, ConstantBias::default())
            .unwrap();
        let mut zeta = Vector9::zeros();
        let dt = 0.001;
        for k in 0..500 {
            let t = k as f64 * dt;
            let acc = Vector3::new(1.0, 0.5 * t, 9.81);
            let omega = Vector3::new(0.3, -0.2, 0.5 + t);
            pim.integrate_measurement(&acc, &omega, dt).unwrap();
            zeta = update_estimate(&zeta, &acc, &omega, dt);
        }
        let diff = pim.increment_vector() - zeta;
        assert!(diff.norm() < 2e-3, "tangent and manifold recursions diverged: {diff:?}");
    }
}
