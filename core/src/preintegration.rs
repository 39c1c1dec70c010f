//! Preintegrated IMU measurements
//!
//! [`PreintegratedMeasurements`] folds a stream of IMU samples into a single relative motion
//! increment `(ΔR_ij, Δv_ij, Δp_ij)` expressed in the body frame at the start of the interval,
//! together with
//!
//! - the first-order covariance of the stacked increment, ordered `[position, velocity, rotation]`,
//! - the Jacobians of the increment with respect to the bias, used to correct the increment when
//!   the bias estimate moves away from the linearization point without re-integrating.
//!
//! Each sample is processed in three phases that must stay in this order:
//!
//! 1. the bias Jacobians are advanced using the rotation and Jacobians *before* the update,
//! 2. the increment itself is advanced,
//! 3. the covariance is propagated with `P ← F P Fᵀ + Q Δt`, where the rotation block of `F`
//!    evaluates the inverse right Jacobian at the updated angle and the right Jacobian at the
//!    previous angle.
//!
//! The rotation representation is a type parameter. Any [`So3`] implementation can be used to
//! accumulate `ΔR_ij`; all covariance and Jacobian arithmetic goes through rotation vectors and
//! direction cosine matrices and is therefore shared.
use log::debug;
use nalgebra::{Matrix3, Rotation3, Vector3};
use std::fmt::{self, Display};

use crate::bias::ConstantBias;
use crate::error::{PreintegrationError, Result};
use crate::linalg::symmetrize;
use crate::params::{MeasurementNoise, PreintegrationParams};
use crate::so3::{So3, right_jacobian, right_jacobian_inverse, vector_to_skew_symmetric};
use crate::{Matrix9, Vector9};

/// A single raw IMU sample held constant over `dt`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImuMeasurement {
    /// Specific force in the sensor frame, m/s^2
    pub acc: Vector3<f64>,
    /// Angular rate in the sensor frame, rad/s
    pub omega: Vector3<f64>,
    /// Duration of the sample, s
    pub dt: f64,
}
impl ImuMeasurement {
    pub fn new(acc: Vector3<f64>, omega: Vector3<f64>, dt: f64) -> Self {
        ImuMeasurement { acc, omega, dt }
    }
}

/// Linearization of one update step
///
/// `f` maps an error in the previous increment `[δp, δv, δθ]` to the updated increment; `g`
/// maps the sample noise `[integration, accelerometer, gyroscope]` (body frame) to the updated
/// increment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PropagationJacobians {
    pub f: Matrix9,
    pub g: Matrix9,
}

/// State-transition matrix of one update plus what is needed to build its noise matrix
struct UpdateStep {
    f: Matrix9,
    r_i: Matrix3<f64>,
    /// `J_r⁻¹(θ_j) J_r(ω dt)`
    theta_noise_map: Matrix3<f64>,
    dt: f64,
    second_order: bool,
}
impl UpdateStep {
    fn noise_jacobian(&self) -> Matrix9 {
        let dt = self.dt;
        let mut g = Matrix9::zeros();
        g.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(Matrix3::identity() * dt));
        if self.second_order {
            g.fixed_view_mut::<3, 3>(0, 3)
                .copy_from(&(0.5 * self.r_i * dt * dt));
        }
        g.fixed_view_mut::<3, 3>(3, 3).copy_from(&(self.r_i * dt));
        g.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(&(self.theta_noise_map * dt));
        g
    }
}

/// Running preintegrated IMU increment between two keyframes
#[derive(Clone, Debug)]
pub struct PreintegratedMeasurements<R: So3 = Rotation3<f64>> {
    params: PreintegrationParams,
    noise: MeasurementNoise,
    bias_hat: ConstantBias,
    delta_r_ij: R,
    delta_v_ij: Vector3<f64>,
    delta_p_ij: Vector3<f64>,
    delta_t_ij: f64,
    preint_meas_cov: Matrix9,
    del_p_del_bias_acc: Matrix3<f64>,
    del_p_del_bias_omega: Matrix3<f64>,
    del_v_del_bias_acc: Matrix3<f64>,
    del_v_del_bias_omega: Matrix3<f64>,
    del_r_del_bias_omega: Matrix3<f64>,
}

impl<R: So3> PreintegratedMeasurements<R> {
    /// Start an empty interval linearized about `bias_hat`
    ///
    /// Fails with [`PreintegrationError::InvalidCovariance`] if any configured covariance is not
    /// symmetric positive semi-definite.
    pub fn new(params: PreintegrationParams, bias_hat: ConstantBias) -> Result<Self> {
        params.validate()?;
        let noise = params.measurement_noise()?;
        Ok(PreintegratedMeasurements {
            params,
            noise,
            bias_hat,
            delta_r_ij: R::identity(),
            delta_v_ij: Vector3::zeros(),
            delta_p_ij: Vector3::zeros(),
            delta_t_ij: 0.0,
            preint_meas_cov: Matrix9::zeros(),
            del_p_del_bias_acc: Matrix3::zeros(),
            del_p_del_bias_omega: Matrix3::zeros(),
            del_v_del_bias_acc: Matrix3::zeros(),
            del_v_del_bias_omega: Matrix3::zeros(),
            del_r_del_bias_omega: Matrix3::zeros(),
        })
    }
    /// Return to the empty state, keeping the current bias linearization point
    pub fn reset(&mut self) {
        debug!(
            "resetting preintegration after {:.3} s, bias_hat {}",
            self.delta_t_ij, self.bias_hat
        );
        self.delta_r_ij = R::identity();
        self.delta_v_ij = Vector3::zeros();
        self.delta_p_ij = Vector3::zeros();
        self.delta_t_ij = 0.0;
        self.preint_meas_cov = Matrix9::zeros();
        self.del_p_del_bias_acc = Matrix3::zeros();
        self.del_p_del_bias_omega = Matrix3::zeros();
        self.del_v_del_bias_acc = Matrix3::zeros();
        self.del_v_del_bias_omega = Matrix3::zeros();
        self.del_r_del_bias_omega = Matrix3::zeros();
    }
    /// Return to the empty state, linearizing the next interval about `bias_hat`
    pub fn reset_with_bias(&mut self, bias_hat: ConstantBias) {
        self.bias_hat = bias_hat;
        self.reset();
    }
    /// True until the first sample is integrated after construction or reset
    pub fn is_empty(&self) -> bool {
        self.delta_t_ij == 0.0
    }
    /// Fold one sample into the increment, its covariance and its bias Jacobians
    ///
    /// # Arguments
    /// * `measured_acc` - raw specific force in the sensor frame, m/s^2
    /// * `measured_omega` - raw angular rate in the sensor frame, rad/s
    /// * `delta_t` - sample duration, s; must be positive and finite
    ///
    /// Invalid input is rejected before any state is modified.
    pub fn integrate_measurement(
        &mut self,
        measured_acc: &Vector3<f64>,
        measured_omega: &Vector3<f64>,
        delta_t: f64,
    ) -> Result<()> {
        self.update(measured_acc, measured_omega, delta_t).map(|_| ())
    }
    /// As [`Self::integrate_measurement`], also returning the propagation Jacobians of the step
    pub fn integrate_measurement_with_jacobians(
        &mut self,
        measured_acc: &Vector3<f64>,
        measured_omega: &Vector3<f64>,
        delta_t: f64,
    ) -> Result<PropagationJacobians> {
        let step = self.update(measured_acc, measured_omega, delta_t)?;
        Ok(PropagationJacobians {
            f: step.f,
            g: step.noise_jacobian(),
        })
    }
    /// Integrate samples in order, stopping at the first invalid one
    ///
    /// Samples before the failing one stay integrated.
    pub fn integrate_measurements<'a, I>(&mut self, measurements: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ImuMeasurement>,
    {
        for m in measurements {
            self.integrate_measurement(&m.acc, &m.omega, m.dt)?;
        }
        Ok(())
    }
    fn update(
        &mut self,
        measured_acc: &Vector3<f64>,
        measured_omega: &Vector3<f64>,
        dt: f64,
    ) -> Result<UpdateStep> {
        check_sample(measured_acc, measured_omega, dt)?;
        let second_order = self.params.use_2nd_order_integration;
        let corrected = self.bias_hat.correct_measurements(
            measured_acc,
            measured_omega,
            self.params.body_p_sensor.as_ref(),
        );
        let acc = corrected.acc;
        let theta_incr = corrected.omega * dt;
        let r_incr = R::exp(&theta_incr);
        let r_incr_matrix = r_incr.matrix();
        let jr_theta_incr = right_jacobian(&theta_incr);

        // pre-update rotation
        let theta_i = self.delta_r_ij.log();
        let r_i = self.delta_r_ij.matrix();
        let jr_theta_i = right_jacobian(&theta_i);
        let acc_skew = vector_to_skew_symmetric(&acc);

        // bias Jacobians, from the pre-update del_r and del_v
        let vel_h_bias_acc = r_i * corrected.acc_h_bias_acc * dt;
        let vel_h_bias_omega = (-r_i * acc_skew * self.del_r_del_bias_omega
            + r_i * corrected.acc_h_bias_omega)
            * dt;
        self.del_p_del_bias_acc += self.del_v_del_bias_acc * dt;
        self.del_p_del_bias_omega += self.del_v_del_bias_omega * dt;
        if second_order {
            self.del_p_del_bias_acc += 0.5 * vel_h_bias_acc * dt;
            self.del_p_del_bias_omega += 0.5 * vel_h_bias_omega * dt;
        }
        self.del_v_del_bias_acc += vel_h_bias_acc;
        self.del_v_del_bias_omega += vel_h_bias_omega;
        self.del_r_del_bias_omega = r_incr_matrix.transpose() * self.del_r_del_bias_omega
            + jr_theta_incr * corrected.omega_h_bias_omega * dt;

        // increment
        let vel_incr = r_i * acc * dt;
        self.delta_p_ij += self.delta_v_ij * dt;
        if second_order {
            self.delta_p_ij += 0.5 * vel_incr * dt;
        }
        self.delta_v_ij += vel_incr;
        self.delta_r_ij = self.delta_r_ij.compose(&r_incr);
        self.delta_t_ij += dt;

        // covariance
        let theta_j = self.delta_r_ij.log();
        let jr_inv_theta_j = right_jacobian_inverse(&theta_j);
        let vel_h_theta = -r_i * acc_skew * jr_theta_i * dt;
        let mut f = Matrix9::identity();
        f.fixed_view_mut::<3, 3>(0, 3)
            .copy_from(&(Matrix3::identity() * dt));
        if second_order {
            f.fixed_view_mut::<3, 3>(0, 6)
                .copy_from(&(0.5 * vel_h_theta * dt));
        }
        f.fixed_view_mut::<3, 3>(3, 6).copy_from(&vel_h_theta);
        f.fixed_view_mut::<3, 3>(6, 6)
            .copy_from(&(jr_inv_theta_j * r_incr_matrix.transpose() * jr_theta_i));
        self.preint_meas_cov =
            symmetrize(&(f * self.preint_meas_cov * f.transpose() + self.noise.matrix() * dt));

        Ok(UpdateStep {
            f,
            r_i,
            theta_noise_map: jr_inv_theta_j * jr_theta_incr,
            dt,
            second_order,
        })
    }

    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }
    pub fn measurement_noise(&self) -> &MeasurementNoise {
        &self.noise
    }
    pub fn bias_hat(&self) -> &ConstantBias {
        &self.bias_hat
    }
    pub fn delta_r_ij(&self) -> &R {
        &self.delta_r_ij
    }
    pub fn delta_v_ij(&self) -> &Vector3<f64> {
        &self.delta_v_ij
    }
    pub fn delta_p_ij(&self) -> &Vector3<f64> {
        &self.delta_p_ij
    }
    pub fn delta_t_ij(&self) -> f64 {
        self.delta_t_ij
    }
    /// Covariance of `[Δp, Δv, δθ]`
    pub fn preint_meas_cov(&self) -> &Matrix9 {
        &self.preint_meas_cov
    }
    pub fn del_p_del_bias_acc(&self) -> &Matrix3<f64> {
        &self.del_p_del_bias_acc
    }
    pub fn del_p_del_bias_omega(&self) -> &Matrix3<f64> {
        &self.del_p_del_bias_omega
    }
    pub fn del_v_del_bias_acc(&self) -> &Matrix3<f64> {
        &self.del_v_del_bias_acc
    }
    pub fn del_v_del_bias_omega(&self) -> &Matrix3<f64> {
        &self.del_v_del_bias_omega
    }
    pub fn del_r_del_bias_omega(&self) -> &Matrix3<f64> {
        &self.del_r_del_bias_omega
    }
    /// Rotation increment corrected to first order for `bias - bias_hat`
    pub fn bias_corrected_delta_r_ij(&self, bias: &ConstantBias) -> R {
        let delta = *bias - self.bias_hat;
        self.delta_r_ij
            .compose(&R::exp(&(self.del_r_del_bias_omega * delta.gyroscope)))
    }
    /// Rotation vector of [`Self::bias_corrected_delta_r_ij`]
    pub fn bias_corrected_theta_r_ij(&self, bias: &ConstantBias) -> Vector3<f64> {
        self.bias_corrected_delta_r_ij(bias).log()
    }
    pub fn bias_corrected_delta_v_ij(&self, bias: &ConstantBias) -> Vector3<f64> {
        let delta = *bias - self.bias_hat;
        self.delta_v_ij
            + self.del_v_del_bias_acc * delta.accelerometer
            + self.del_v_del_bias_omega * delta.gyroscope
    }
    pub fn bias_corrected_delta_p_ij(&self, bias: &ConstantBias) -> Vector3<f64> {
        let delta = *bias - self.bias_hat;
        self.delta_p_ij
            + self.del_p_del_bias_acc * delta.accelerometer
            + self.del_p_del_bias_omega * delta.gyroscope
    }
    /// Compare increments, covariances, noise and bias Jacobians element-wise within `tol`
    pub fn equals(&self, other: &Self, tol: f64) -> bool {
        let close = |a: &Matrix3<f64>, b: &Matrix3<f64>| (a - b).abs().max() <= tol;
        (self.delta_t_ij - other.delta_t_ij).abs() <= tol
            && self.delta_r_ij.between(&other.delta_r_ij).log().norm() <= tol
            && (self.delta_v_ij - other.delta_v_ij).abs().max() <= tol
            && (self.delta_p_ij - other.delta_p_ij).abs().max() <= tol
            && (self.bias_hat.vector() - other.bias_hat.vector()).abs().max() <= tol
            && (self.preint_meas_cov - other.preint_meas_cov).abs().max() <= tol
            && (self.noise.matrix() - other.noise.matrix()).abs().max() <= tol
            && close(&self.del_p_del_bias_acc, &other.del_p_del_bias_acc)
            && close(&self.del_p_del_bias_omega, &other.del_p_del_bias_omega)
            && close(&self.del_v_del_bias_acc, &other.del_v_del_bias_acc)
            && close(&self.del_v_del_bias_omega, &other.del_v_del_bias_omega)
            && close(&self.del_r_del_bias_omega, &other.del_r_del_bias_omega)
    }
    /// Stacked `[Δp, Δv, Log(ΔR)]`
    pub fn increment_vector(&self) -> Vector9 {
        let mut z = Vector9::zeros();
        z.fixed_rows_mut::<3>(0).copy_from(&self.delta_p_ij);
        z.fixed_rows_mut::<3>(3).copy_from(&self.delta_v_ij);
        z.fixed_rows_mut::<3>(6).copy_from(&self.delta_r_ij.log());
        z
    }
}

impl<R: So3> Display for PreintegratedMeasurements<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let theta = self.delta_r_ij.log();
        write!(
            f,
            "PreintegratedMeasurements {{ dt: {:.4}, theta: [{:.6}, {:.6}, {:.6}], dv: [{:.6}, {:.6}, {:.6}], dp: [{:.6}, {:.6}, {:.6}], cov_trace: {:.3e} }}",
            self.delta_t_ij,
            theta[0],
            theta[1],
            theta[2],
            self.delta_v_ij[0],
            self.delta_v_ij[1],
            self.delta_v_ij[2],
            self.delta_p_ij[0],
            self.delta_p_ij[1],
            self.delta_p_ij[2],
            self.preint_meas_cov.trace()
        )
    }
}

fn check_sample(acc: &Vector3<f64>, omega: &Vector3<f64>, dt: f64) -> Result<()> {
    if !dt.is_finite() || dt <= 0.0 {
        return Err(PreintegrationError::InvalidInput(format!(
            "sample duration must be positive and finite, got {dt}"
        )));
    }
    if acc.iter().chain(omega.iter()).any(|x| !x.is_finite()) {
        return Err(PreintegrationError::InvalidInput(format!(
            "non-finite IMU reading acc={acc:?} omega={omega:?}"
        )));
    }
    Ok(())
}
