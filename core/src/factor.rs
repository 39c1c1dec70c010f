//! IMU factor: residual and Jacobians of a preintegrated increment between two navigation states
//!
//! The residual compares the state at the end of the interval with the state predicted from
//! the start of the interval and the preintegrated increment. The increment is first corrected
//! for the difference between the current bias estimate and the bias the increment was
//! linearized about, then gravity and (optionally) the Coriolis effect of a rotating navigation
//! frame are applied.
//!
//! With $\delta b = b - \hat b$, $\Delta t = \Delta t_{ij}$ and $\Omega = [\omega_c]_\times$:
//!
//! $$
//! \begin{aligned}
//! r_p &= p_j - p_i - R_i \Delta\tilde p_{ij} - v_i \Delta t + \Omega v_i \Delta t^2 - \tfrac{1}{2} g \Delta t^2 \;\left(+\tfrac{1}{2}\Omega^2 p_i \Delta t^2\right) \\\\
//! r_v &= v_j - v_i - R_i \Delta\tilde v_{ij} + 2\Omega v_i \Delta t - g \Delta t \;\left(+\Omega^2 p_i \Delta t\right) \\\\
//! r_R &= \mathrm{Log}\left(\mathrm{Exp}(\theta_{bcc})^T R_i^T R_j\right), \quad \theta_{bcc} = \mathrm{Log}(\Delta R_{ij}\mathrm{Exp}(\tfrac{\partial R}{\partial b_g}\delta b_g)) - R_i^T\omega_c \Delta t
//! \end{aligned}
//! $$
//!
//! The parenthesized terms are only present with the second-order Coriolis correction. The
//! residual is ordered `[position, velocity, rotation]`. Pose Jacobians are taken with respect
//! to the `[rotation, translation]` tangent of [`Pose3`], bias Jacobians with respect to the
//! `[accelerometer, gyroscope]` tangent of [`ConstantBias`].
use log::debug;
use nalgebra::{Matrix3, Rotation3, Vector3};

use crate::bias::ConstantBias;
use crate::error::Result;
use crate::noise::GaussianNoiseModel;
use crate::pose::Pose3;
use crate::preintegration::PreintegratedMeasurements;
use crate::so3::{
    So3, exp_map, log_map, right_jacobian, right_jacobian_inverse, vector_to_skew_symmetric,
};
use crate::{Matrix93, Matrix96, Vector9};

/// Selects which Jacobians [`PreintegratedMeasurements::compute_error_and_jacobians`] fills
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JacobianRequest {
    pub pose_i: bool,
    pub vel_i: bool,
    pub pose_j: bool,
    pub vel_j: bool,
    pub bias: bool,
}
impl JacobianRequest {
    /// Residual only
    pub const NONE: JacobianRequest = JacobianRequest {
        pose_i: false,
        vel_i: false,
        pose_j: false,
        vel_j: false,
        bias: false,
    };
    pub const ALL: JacobianRequest = JacobianRequest {
        pose_i: true,
        vel_i: true,
        pose_j: true,
        vel_j: true,
        bias: true,
    };
}

/// Jacobians of the 9D residual; unrequested slots are `None`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuFactorJacobians {
    pub pose_i: Option<Matrix96>,
    pub vel_i: Option<Matrix93>,
    pub pose_j: Option<Matrix96>,
    pub vel_j: Option<Matrix93>,
    pub bias: Option<Matrix96>,
}

impl<R: So3> PreintegratedMeasurements<R> {
    /// Residual between the end state and the state predicted from the start state, plus the
    /// requested Jacobians
    ///
    /// # Arguments
    /// * `pose_i`, `vel_i` - navigation state at the start of the interval
    /// * `pose_j`, `vel_j` - navigation state at the end of the interval
    /// * `bias` - current bias estimate
    /// * `gravity` - gravity in the navigation frame
    /// * `omega_coriolis` - rotation rate of the navigation frame
    /// * `use_2nd_order_coriolis` - include the centrifugal terms
    /// * `request` - which Jacobians to compute
    #[allow(clippy::too_many_arguments)]
    pub fn compute_error_and_jacobians(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        pose_j: &Pose3,
        vel_j: &Vector3<f64>,
        bias: &ConstantBias,
        gravity: &Vector3<f64>,
        omega_coriolis: &Vector3<f64>,
        use_2nd_order_coriolis: bool,
        request: JacobianRequest,
    ) -> (Vector9, ImuFactorJacobians) {
        let dt = self.delta_t_ij();
        let dt2 = dt * dt;
        let delta_bias = *bias - *self.bias_hat();
        let r_i = *pose_i.rotation.matrix();
        let r_j = *pose_j.rotation.matrix();
        let p_i = pose_i.translation;
        let p_j = pose_j.translation;
        let omega_skew = vector_to_skew_symmetric(omega_coriolis);

        let delta_p = self.bias_corrected_delta_p_ij(bias);
        let delta_v = self.bias_corrected_delta_v_ij(bias);
        let theta_biascorrected = self.bias_corrected_theta_r_ij(bias);
        let theta_corrected = theta_biascorrected - r_i.transpose() * omega_coriolis * dt;
        let f_r_hat = exp_map(&theta_corrected).transpose() * r_i.transpose() * r_j;
        let f_r = log_map(&f_r_hat);

        let mut f_p = p_j - p_i - r_i * delta_p - vel_i * dt + omega_skew * vel_i * dt2
            - 0.5 * gravity * dt2;
        let mut f_v = vel_j - vel_i - r_i * delta_v + 2.0 * omega_skew * vel_i * dt - gravity * dt;
        if use_2nd_order_coriolis {
            f_p += 0.5 * omega_skew * omega_skew * p_i * dt2;
            f_v += omega_skew * omega_skew * p_i * dt;
        }
        let mut residual = Vector9::zeros();
        residual.fixed_rows_mut::<3>(0).copy_from(&f_p);
        residual.fixed_rows_mut::<3>(3).copy_from(&f_v);
        residual.fixed_rows_mut::<3>(6).copy_from(&f_r);

        let mut jacobians = ImuFactorJacobians::default();
        if request.vel_i {
            let mut h = Matrix93::zeros();
            h.fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(-Matrix3::identity() * dt + omega_skew * dt2));
            h.fixed_view_mut::<3, 3>(3, 0)
                .copy_from(&(-Matrix3::identity() + 2.0 * omega_skew * dt));
            jacobians.vel_i = Some(h);
        }
        if request.vel_j {
            let mut h = Matrix93::zeros();
            h.fixed_view_mut::<3, 3>(3, 0)
                .copy_from(&Matrix3::identity());
            jacobians.vel_j = Some(h);
        }
        if !(request.pose_i || request.pose_j || request.bias) {
            return (residual, jacobians);
        }
        let jr_inv_f_r = right_jacobian_inverse(&f_r);
        if request.pose_j {
            let mut h = Matrix96::zeros();
            h.fixed_view_mut::<3, 3>(0, 3).copy_from(&r_j);
            h.fixed_view_mut::<3, 3>(6, 0).copy_from(&jr_inv_f_r);
            jacobians.pose_j = Some(h);
        }
        if !(request.pose_i || request.bias) {
            return (residual, jacobians);
        }
        let jr_theta_corrected = right_jacobian(&theta_corrected);
        if request.pose_i {
            let j_theta =
                -jr_theta_corrected * vector_to_skew_symmetric(&(r_i.transpose() * omega_coriolis * dt));
            let (dfp_dpi, dfv_dpi) = if use_2nd_order_coriolis {
                (
                    -r_i + 0.5 * omega_skew * omega_skew * r_i * dt2,
                    omega_skew * omega_skew * r_i * dt,
                )
            } else {
                (-r_i, Matrix3::zeros())
            };
            let mut h = Matrix96::zeros();
            h.fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(r_i * vector_to_skew_symmetric(&delta_p)));
            h.fixed_view_mut::<3, 3>(0, 3).copy_from(&dfp_dpi);
            h.fixed_view_mut::<3, 3>(3, 0)
                .copy_from(&(r_i * vector_to_skew_symmetric(&delta_v)));
            h.fixed_view_mut::<3, 3>(3, 3).copy_from(&dfv_dpi);
            h.fixed_view_mut::<3, 3>(6, 0).copy_from(
                &(jr_inv_f_r * (-r_j.transpose() * r_i - f_r_hat.transpose() * j_theta)),
            );
            jacobians.pose_i = Some(h);
        }
        if request.bias {
            let del_r = *self.del_r_del_bias_omega();
            let j_bias_omega = jr_theta_corrected
                * right_jacobian_inverse(&theta_biascorrected)
                * right_jacobian(&(del_r * delta_bias.gyroscope))
                * del_r;
            let mut h = Matrix96::zeros();
            h.fixed_view_mut::<3, 3>(0, 0)
                .copy_from(&(-r_i * self.del_p_del_bias_acc()));
            h.fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(-r_i * self.del_p_del_bias_omega()));
            h.fixed_view_mut::<3, 3>(3, 0)
                .copy_from(&(-r_i * self.del_v_del_bias_acc()));
            h.fixed_view_mut::<3, 3>(3, 3)
                .copy_from(&(-r_i * self.del_v_del_bias_omega()));
            h.fixed_view_mut::<3, 3>(6, 3)
                .copy_from(&(-jr_inv_f_r * f_r_hat.transpose() * j_bias_omega));
            jacobians.bias = Some(h);
        }
        (residual, jacobians)
    }
    /// End state at which the residual vanishes
    pub fn predict(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        bias: &ConstantBias,
        gravity: &Vector3<f64>,
        omega_coriolis: &Vector3<f64>,
        use_2nd_order_coriolis: bool,
    ) -> (Pose3, Vector3<f64>) {
        let dt = self.delta_t_ij();
        let dt2 = dt * dt;
        let r_i = *pose_i.rotation.matrix();
        let p_i = pose_i.translation;
        let omega_skew = vector_to_skew_symmetric(omega_coriolis);

        let mut p_j = p_i + r_i * self.bias_corrected_delta_p_ij(bias) + vel_i * dt
            - omega_skew * vel_i * dt2
            + 0.5 * gravity * dt2;
        let mut v_j = vel_i + r_i * self.bias_corrected_delta_v_ij(bias)
            - 2.0 * omega_skew * vel_i * dt
            + gravity * dt;
        if use_2nd_order_coriolis {
            p_j -= 0.5 * omega_skew * omega_skew * p_i * dt2;
            v_j -= omega_skew * omega_skew * p_i * dt;
        }
        let theta_corrected =
            self.bias_corrected_theta_r_ij(bias) - r_i.transpose() * omega_coriolis * dt;
        let rotation = pose_i.rotation * Rotation3::from_matrix_unchecked(exp_map(&theta_corrected));
        (Pose3::new(rotation, p_j), v_j)
    }
}

/// A finalized preintegrated increment together with its navigation frame and noise model
///
/// Evaluation only reads the factor, so a factor can be shared between threads once built.
#[derive(Clone, Debug)]
pub struct ImuFactor<R: So3 = Rotation3<f64>> {
    preintegrated: PreintegratedMeasurements<R>,
    gravity: Vector3<f64>,
    omega_coriolis: Vector3<f64>,
    use_2nd_order_coriolis: bool,
    noise_model: GaussianNoiseModel<9>,
}
impl<R: So3> ImuFactor<R> {
    /// Build a factor using gravity and Coriolis settings from the preintegration parameters
    pub fn new(preintegrated: PreintegratedMeasurements<R>) -> Result<Self> {
        let params = *preintegrated.params();
        Self::with_frame(
            preintegrated,
            params.gravity,
            params.omega_coriolis,
            params.use_2nd_order_coriolis,
        )
    }
    /// Build a factor with an explicit navigation frame
    ///
    /// Fails with [`crate::PreintegrationError::NotPositiveDefinite`] when the preintegrated
    /// covariance cannot be factored, e.g. for an empty interval or noiseless parameters.
    pub fn with_frame(
        preintegrated: PreintegratedMeasurements<R>,
        gravity: Vector3<f64>,
        omega_coriolis: Vector3<f64>,
        use_2nd_order_coriolis: bool,
    ) -> Result<Self> {
        let noise_model = GaussianNoiseModel::from_covariance(*preintegrated.preint_meas_cov())?;
        debug!("built IMU factor from {preintegrated}");
        Ok(ImuFactor {
            preintegrated,
            gravity,
            omega_coriolis,
            use_2nd_order_coriolis,
            noise_model,
        })
    }
    pub fn preintegrated(&self) -> &PreintegratedMeasurements<R> {
        &self.preintegrated
    }
    pub fn noise_model(&self) -> &GaussianNoiseModel<9> {
        &self.noise_model
    }
    pub fn gravity(&self) -> &Vector3<f64> {
        &self.gravity
    }
    pub fn omega_coriolis(&self) -> &Vector3<f64> {
        &self.omega_coriolis
    }
    /// Unwhitened residual and requested Jacobians
    pub fn evaluate_error(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        pose_j: &Pose3,
        vel_j: &Vector3<f64>,
        bias: &ConstantBias,
        request: JacobianRequest,
    ) -> (Vector9, ImuFactorJacobians) {
        self.preintegrated.compute_error_and_jacobians(
            pose_i,
            vel_i,
            pose_j,
            vel_j,
            bias,
            &self.gravity,
            &self.omega_coriolis,
            self.use_2nd_order_coriolis,
            request,
        )
    }
    /// Residual and Jacobians premultiplied by the square-root information matrix
    pub fn linearize(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        pose_j: &Pose3,
        vel_j: &Vector3<f64>,
        bias: &ConstantBias,
        request: JacobianRequest,
    ) -> (Vector9, ImuFactorJacobians) {
        let (residual, jacobians) =
            self.evaluate_error(pose_i, vel_i, pose_j, vel_j, bias, request);
        let model = &self.noise_model;
        let whitened = ImuFactorJacobians {
            pose_i: jacobians.pose_i.map(|h| model.whiten_jacobian(&h)),
            vel_i: jacobians.vel_i.map(|h| model.whiten_jacobian(&h)),
            pose_j: jacobians.pose_j.map(|h| model.whiten_jacobian(&h)),
            vel_j: jacobians.vel_j.map(|h| model.whiten_jacobian(&h)),
            bias: jacobians.bias.map(|h| model.whiten_jacobian(&h)),
        };
        (model.whiten(&residual), whitened)
    }
    pub fn whitened_error(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        pose_j: &Pose3,
        vel_j: &Vector3<f64>,
        bias: &ConstantBias,
    ) -> Vector9 {
        let (residual, _) =
            self.evaluate_error(pose_i, vel_i, pose_j, vel_j, bias, JacobianRequest::NONE);
        self.noise_model.whiten(&residual)
    }
    /// Negative log-likelihood up to a constant, `½‖r‖²_Σ`
    pub fn error(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        pose_j: &Pose3,
        vel_j: &Vector3<f64>,
        bias: &ConstantBias,
    ) -> f64 {
        0.5 * self
            .whitened_error(pose_i, vel_i, pose_j, vel_j, bias)
            .norm_squared()
    }
    pub fn predict(
        &self,
        pose_i: &Pose3,
        vel_i: &Vector3<f64>,
        bias: &ConstantBias,
    ) -> (Pose3, Vector3<f64>) {
        self.preintegrated.predict(
            pose_i,
            vel_i,
            bias,
            &self.gravity,
            &self.omega_coriolis,
            self.use_2nd_order_coriolis,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreintegrationError;
    use crate::numerical::{DEFAULT_STEP, numerical_jacobian};
    use crate::params::PreintegrationParams;
    use nalgebra::{UnitQuaternion, Vector6};
    use rayon::prelude::*;

    struct Case {
        pim: PreintegratedMeasurements,
        pose_i: Pose3,
        vel_i: Vector3<f64>,
        pose_j: Pose3,
        vel_j: Vector3<f64>,
        bias: ConstantBias,
        gravity: Vector3<f64>,
        omega_coriolis: Vector3<f64>,
        second_order_coriolis: bool,
    }
    impl Case {
        fn residual(
            &self,
            pose_i: &Pose3,
            vel_i: &Vector3<f64>,
            pose_j: &Pose3,
            vel_j: &Vector3<f64>,
            bias: &ConstantBias,
        ) -> Vector9 {
            self.pim
                .compute_error_and_jacobians(
                    pose_i,
                    vel_i,
                    pose_j,
                    vel_j,
                    bias,
                    &self.gravity,
                    &self.omega_coriolis,
                    self.second_order_coriolis,
                    JacobianRequest::NONE,
                )
                .0
        }
        fn jacobians(&self) -> ImuFactorJacobians {
            self.pim
                .compute_error_and_jacobians(
                    &self.pose_i,
                    &self.vel_i,
                    &self.pose_j,
                    &self.vel_j,
                    &self.bias,
                    &self.gravity,
                    &self.omega_coriolis,
                    self.second_order_coriolis,
                    JacobianRequest::ALL,
                )
                .1
        }
        fn check_jacobians(&self, tol: f64) {
            let jac = self.jacobians();
            let (pi, vi, pj, vj, b) = (&self.pose_i, &self.vel_i, &self.pose_j, &self.vel_j, &self.bias);
            let checks: [(&str, f64); 5] = [
                (
                    "pose_i",
                    max_diff(
                        &jac.pose_i.unwrap(),
                        &numerical_jacobian(
                            |d: &Vector6<f64>| self.residual(&pi.retract(d), vi, pj, vj, b),
                            &Vector6::zeros(),
                            DEFAULT_STEP,
                        ),
                    ),
                ),
                (
                    "vel_i",
                    max_diff(
                        &jac.vel_i.unwrap(),
                        &numerical_jacobian(
                            |d: &Vector3<f64>| self.residual(pi, &(vi + d), pj, vj, b),
                            &Vector3::zeros(),
                            DEFAULT_STEP,
                        ),
                    ),
                ),
                (
                    "pose_j",
                    max_diff(
                        &jac.pose_j.unwrap(),
                        &numerical_jacobian(
                            |d: &Vector6<f64>| self.residual(pi, vi, &pj.retract(d), vj, b),
                            &Vector6::zeros(),
                            DEFAULT_STEP,
                        ),
                    ),
                ),
                (
                    "vel_j",
                    max_diff(
                        &jac.vel_j.unwrap(),
                        &numerical_jacobian(
                            |d: &Vector3<f64>| self.residual(pi, vi, pj, &(vj + d), b),
                            &Vector3::zeros(),
                            DEFAULT_STEP,
                        ),
                    ),
                ),
                (
                    "bias",
                    max_diff(
                        &jac.bias.unwrap(),
                        &numerical_jacobian(
                            |d: &Vector6<f64>| self.residual(pi, vi, pj, vj, &b.retract(d)),
                            &Vector6::zeros(),
                            DEFAULT_STEP,
                        ),
                    ),
                ),
            ];
            for (name, err) in checks {
                eprintln!("max |H_{name} - H_num| = {err:.3e}");
                assert!(err < tol, "{name} jacobian mismatch {err}");
            }
        }
    }
    fn max_diff<const C: usize>(
        a: &nalgebra::SMatrix<f64, 9, C>,
        b: &nalgebra::SMatrix<f64, 9, C>,
    ) -> f64 {
        (a - b).abs().max()
    }
    fn integrated(bias_hat: ConstantBias) -> PreintegratedMeasurements {
        let params = PreintegrationParams::new(
            Matrix3::identity() * 1e-4,
            Matrix3::identity() * 1e-6,
            Matrix3::identity() * 1e-8,
            true,
        )
        .unwrap();
        let mut pim = PreintegratedMeasurements::new(params, bias_hat).unwrap();
        for k in 0..50 {
            let t = k as f64 * 0.01;
            pim.integrate_measurement(
                &Vector3::new(0.5 * t.sin(), 0.2, 9.81 + 0.1 * t),
                &Vector3::new(0.2, -0.1 + 0.2 * t, 0.4),
                0.01,
            )
            .unwrap();
        }
        pim
    }
    fn near_zero_case() -> Case {
        Case {
            pim: integrated(ConstantBias::default()),
            pose_i: Pose3::identity(),
            vel_i: Vector3::zeros(),
            pose_j: Pose3::identity(),
            vel_j: Vector3::zeros(),
            bias: ConstantBias::default(),
            gravity: Vector3::new(0.0, 0.0, -9.81),
            omega_coriolis: Vector3::zeros(),
            second_order_coriolis: false,
        }
    }
    fn far_case(omega_coriolis: Vector3<f64>, second_order_coriolis: bool) -> Case {
        let pim = integrated(ConstantBias::new(
            Vector3::new(0.02, -0.01, 0.03),
            Vector3::new(0.001, -0.002, 0.003),
        ));
        let pose_i = Pose3::from_euler_translation(0.3, -0.2, 1.0, Vector3::new(10.0, -5.0, 3.0));
        let vel_i = Vector3::new(2.0, 1.0, -0.5);
        let bias = ConstantBias::new(Vector3::new(0.05, 0.0, 0.01), Vector3::new(0.004, 0.01, -0.002));
        let gravity = Vector3::new(0.0, 0.0, -9.81);
        let (predicted_pose, predicted_vel) =
            pim.predict(&pose_i, &vel_i, &bias, &gravity, &omega_coriolis, second_order_coriolis);
        Case {
            pim,
            pose_i,
            vel_i,
            pose_j: predicted_pose.retract(&Vector6::new(0.05, -0.1, 0.2, 0.3, -0.2, 0.1)),
            vel_j: predicted_vel + Vector3::new(0.1, -0.3, 0.2),
            bias,
            gravity,
            omega_coriolis,
            second_order_coriolis,
        }
    }

    #[test]
    fn jacobians_near_zero() {
        near_zero_case().check_jacobians(1e-9);
    }
    #[test]
    fn jacobians_far_from_zero() {
        far_case(Vector3::zeros(), false).check_jacobians(1e-7);
    }
    #[test]
    fn jacobians_with_coriolis() {
        let omega = Vector3::new(0.01, 0.02, 0.03);
        far_case(omega, false).check_jacobians(1e-7);
        far_case(omega, true).check_jacobians(1e-7);
    }
    #[test]
    fn unrequested_jacobians_are_not_filled() {
        let case = near_zero_case();
        let request = JacobianRequest {
            pose_j: true,
            ..JacobianRequest::NONE
        };
        let (_, jac) = case.pim.compute_error_and_jacobians(
            &case.pose_i,
            &case.vel_i,
            &case.pose_j,
            &case.vel_j,
            &case.bias,
            &case.gravity,
            &case.omega_coriolis,
            false,
            request,
        );
        assert!(jac.pose_j.is_some());
        assert!(jac.pose_i.is_none() && jac.vel_i.is_none() && jac.vel_j.is_none() && jac.bias.is_none());
    }
    #[test]
    fn partial_requests_match_full_request() {
        let case = far_case(Vector3::new(0.01, 0.02, 0.03), true);
        let full = case.jacobians();
        for mask in 0..32u8 {
            let request = JacobianRequest {
                pose_i: mask & 1 != 0,
                vel_i: mask & 2 != 0,
                pose_j: mask & 4 != 0,
                vel_j: mask & 8 != 0,
                bias: mask & 16 != 0,
            };
            let (residual, jac) = case.pim.compute_error_and_jacobians(
                &case.pose_i,
                &case.vel_i,
                &case.pose_j,
                &case.vel_j,
                &case.bias,
                &case.gravity,
                &case.omega_coriolis,
                case.second_order_coriolis,
                request,
            );
            assert_eq!(residual, case.residual(&case.pose_i, &case.vel_i, &case.pose_j, &case.vel_j, &case.bias));
            assert_eq!(jac.pose_i, full.pose_i.filter(|_| request.pose_i));
            assert_eq!(jac.vel_i, full.vel_i.filter(|_| request.vel_i));
            assert_eq!(jac.pose_j, full.pose_j.filter(|_| request.pose_j));
            assert_eq!(jac.vel_j, full.vel_j.filter(|_| request.vel_j));
            assert_eq!(jac.bias, full.bias.filter(|_| request.bias));
        }
    }
    #[test]
    fn residual_vanishes_at_prediction() {
        for (omega, second_order) in [
            (Vector3::zeros(), false),
            (Vector3::new(0.0, 4e-5, 6e-5), false),
            (Vector3::new(0.01, -0.02, 0.03), true),
        ] {
            let case = far_case(omega, second_order);
            let (pose_j, vel_j) = case.pim.predict(
                &case.pose_i,
                &case.vel_i,
                &case.bias,
                &case.gravity,
                &omega,
                second_order,
            );
            let residual = case.residual(&case.pose_i, &case.vel_i, &pose_j, &vel_j, &case.bias);
            assert!(residual.norm() < 1e-9, "residual {residual:?}");
        }
    }
    #[test]
    fn stationary_residual_is_zero() {
        let params = PreintegrationParams::default();
        let mut pim =
            PreintegratedMeasurements::<Rotation3<f64>>::new(params, ConstantBias::default())
                .unwrap();
        for _ in 0..10 {
            pim.integrate_measurement(&Vector3::new(0.0, 0.0, 9.81), &Vector3::zeros(), 0.1)
                .unwrap();
        }
        let factor = ImuFactor::new(pim).unwrap();
        let bias = ConstantBias::default();
        let (residual, _) = factor.evaluate_error(
            &Pose3::identity(),
            &Vector3::zeros(),
            &Pose3::identity(),
            &Vector3::zeros(),
            &bias,
            JacobianRequest::NONE,
        );
        assert!(residual.norm() < 1e-9, "residual {residual:?}");
        assert!(
            factor.error(&Pose3::identity(), &Vector3::zeros(), &Pose3::identity(), &Vector3::zeros(), &bias)
                < 1e-9
        );
    }
    #[test]
    fn factor_error_is_half_squared_mahalanobis() {
        let case = far_case(Vector3::zeros(), false);
        let cov = *case.pim.preint_meas_cov();
        let factor = ImuFactor::with_frame(case.pim.clone(), case.gravity, Vector3::zeros(), false).unwrap();
        let residual = case.residual(&case.pose_i, &case.vel_i, &case.pose_j, &case.vel_j, &case.bias);
        let expected = 0.5 * (residual.transpose() * cov.try_inverse().unwrap() * residual)[(0, 0)];
        let error = factor.error(&case.pose_i, &case.vel_i, &case.pose_j, &case.vel_j, &case.bias);
        assert!((error - expected).abs() < 1e-6 * expected.abs().max(1.0));
        let (white, jac) = factor.linearize(
            &case.pose_i,
            &case.vel_i,
            &case.pose_j,
            &case.vel_j,
            &case.bias,
            JacobianRequest::ALL,
        );
        assert!((white - factor.noise_model().whiten(&residual)).norm() < 1e-9);
        let raw = case.jacobians();
        let expected_vel_j = factor.noise_model().sqrt_information() * raw.vel_j.unwrap();
        assert!((jac.vel_j.unwrap() - expected_vel_j).abs().max() < 1e-9);
    }
    #[test]
    fn empty_interval_cannot_form_factor() {
        let pim = PreintegratedMeasurements::<Rotation3<f64>>::new(
            PreintegrationParams::default(),
            ConstantBias::default(),
        )
        .unwrap();
        assert!(matches!(
            ImuFactor::new(pim),
            Err(PreintegrationError::NotPositiveDefinite(_))
        ));
    }
    #[test]
    fn quaternion_factor_matches_matrix_factor() {
        let matrix = ImuFactor::new(integrated(ConstantBias::default())).unwrap();
        let params = *matrix.preintegrated().params();
        let mut pim = PreintegratedMeasurements::<UnitQuaternion<f64>>::new(params, ConstantBias::default()).unwrap();
        for k in 0..50 {
            let t = k as f64 * 0.01;
            pim.integrate_measurement(
                &Vector3::new(0.5 * t.sin(), 0.2, 9.81 + 0.1 * t),
                &Vector3::new(0.2, -0.1 + 0.2 * t, 0.4),
                0.01,
            )
            .unwrap();
        }
        let quaternion = ImuFactor::new(pim).unwrap();
        let case = far_case(Vector3::zeros(), false);
        let e_m = matrix.whitened_error(&case.pose_i, &case.vel_i, &case.pose_j, &case.vel_j, &case.bias);
        let e_q = quaternion.whitened_error(&case.pose_i, &case.vel_i, &case.pose_j, &case.vel_j, &case.bias);
        assert!((e_m - e_q).norm() < 1e-6 * e_m.norm().max(1.0));
    }
    #[test]
    fn factors_evaluate_concurrently() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ImuFactor>();
        assert_send_sync::<ImuFactor<UnitQuaternion<f64>>>();
        let case = far_case(Vector3::new(0.0, 0.0, 7.292115e-5), true);
        let factor = ImuFactor::with_frame(case.pim.clone(), case.gravity, case.omega_coriolis, true).unwrap();
        let sequential: Vec<f64> = (0..64)
            .map(|k| {
                let vel_j = case.vel_j + Vector3::new(0.01 * k as f64, 0.0, 0.0);
                factor.error(&case.pose_i, &case.vel_i, &case.pose_j, &vel_j, &case.bias)
            })
            .collect();
        let parallel: Vec<f64> = (0..64)
            .into_par_iter()
            .map(|k| {
                let vel_j = case.vel_j + Vector3::new(0.01 * k as f64, 0.0, 0.0);
                factor.error(&case.pose_i, &case.vel_i, &case.pose_j, &vel_j, &case.bias)
            })
            .collect();
        assert_eq!(sequential, parallel);
    }
}
