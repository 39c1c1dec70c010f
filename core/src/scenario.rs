//! Kinematic scenarios with exact ground truth and the IMU readings they induce
//!
//! A [`Scenario`] describes a body trajectory in closed form. From it, [`ScenarioRunner`]
//! synthesizes the gyroscope and accelerometer readings an IMU rigidly attached to the body
//! would produce, optionally corrupted by a constant bias and by white noise drawn from the
//! configured covariances, and integrates them into a [`PreintegratedMeasurements`].
//!
//! Readings are sampled at the start of each sample interval and held constant over it, which
//! is the assumption the preintegration recursion makes.
use nalgebra::{Rotation3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::bias::ConstantBias;
use crate::error::{PreintegrationError, Result};
use crate::linalg::matrix_square_root;
use crate::params::PreintegrationParams;
use crate::pose::Pose3;
use crate::preintegration::{ImuMeasurement, PreintegratedMeasurements};
use crate::so3::{exp_map, right_jacobian, vector_to_skew_symmetric};

/// A trajectory known in closed form
///
/// Rotations are body-to-navigation, positions and velocities are expressed in the navigation
/// frame, and angular rates in the body frame.
pub trait Scenario: Send + Sync {
    fn pose(&self, t: f64) -> Pose3;
    fn omega_body(&self, t: f64) -> Vector3<f64>;
    fn velocity_nav(&self, t: f64) -> Vector3<f64>;
    fn acceleration_nav(&self, t: f64) -> Vector3<f64>;

    fn rotation(&self, t: f64) -> Rotation3<f64> {
        self.pose(t).rotation
    }
    fn velocity_body(&self, t: f64) -> Vector3<f64> {
        self.rotation(t).inverse() * self.velocity_nav(t)
    }
    /// What an ideal accelerometer reads: `Rᵀ (a - g)`
    fn specific_force_body(&self, t: f64, gravity: &Vector3<f64>) -> Vector3<f64> {
        self.rotation(t).inverse() * (self.acceleration_nav(t) - gravity)
    }
}

/// A body at rest
#[derive(Clone, Copy, Debug, Default)]
pub struct StationaryScenario {
    pub pose: Pose3,
}
impl Scenario for StationaryScenario {
    fn pose(&self, _t: f64) -> Pose3 {
        self.pose
    }
    fn omega_body(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn velocity_nav(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
    fn acceleration_nav(&self, _t: f64) -> Vector3<f64> {
        Vector3::zeros()
    }
}

/// Constant navigation-frame acceleration with a constant body rate
#[derive(Clone, Copy, Debug)]
pub struct AcceleratingScenario {
    pub initial_pose: Pose3,
    /// Initial velocity in the navigation frame
    pub initial_velocity: Vector3<f64>,
    /// Acceleration in the navigation frame
    pub acceleration: Vector3<f64>,
    /// Angular rate in the body frame
    pub omega: Vector3<f64>,
}
impl Scenario for AcceleratingScenario {
    fn pose(&self, t: f64) -> Pose3 {
        let rotation =
            self.initial_pose.rotation * Rotation3::from_matrix_unchecked(exp_map(&(self.omega * t)));
        let translation = self.initial_pose.translation
            + self.initial_velocity * t
            + 0.5 * self.acceleration * t * t;
        Pose3::new(rotation, translation)
    }
    fn omega_body(&self, _t: f64) -> Vector3<f64> {
        self.omega
    }
    fn velocity_nav(&self, t: f64) -> Vector3<f64> {
        self.initial_velocity + self.acceleration * t
    }
    fn acceleration_nav(&self, _t: f64) -> Vector3<f64> {
        self.acceleration
    }
}

/// Constant body rate and constant body-frame velocity (a helix in general)
///
/// The position follows from `∫₀ᵗ Exp(ωs) ds = t·Jr(ωt)ᵀ`.
#[derive(Clone, Copy, Debug)]
pub struct ConstantTwistScenario {
    pub initial_pose: Pose3,
    /// Angular rate in the body frame
    pub omega: Vector3<f64>,
    /// Velocity in the body frame
    pub velocity: Vector3<f64>,
}
impl Scenario for ConstantTwistScenario {
    fn pose(&self, t: f64) -> Pose3 {
        let theta = self.omega * t;
        let rotation =
            self.initial_pose.rotation * Rotation3::from_matrix_unchecked(exp_map(&theta));
        let translation = self.initial_pose.translation
            + self.initial_pose.rotation * (right_jacobian(&theta).transpose() * self.velocity * t);
        Pose3::new(rotation, translation)
    }
    fn omega_body(&self, _t: f64) -> Vector3<f64> {
        self.omega
    }
    fn velocity_nav(&self, t: f64) -> Vector3<f64> {
        self.rotation(t) * self.velocity
    }
    fn acceleration_nav(&self, t: f64) -> Vector3<f64> {
        self.rotation(t) * self.omega.cross(&self.velocity)
    }
}

/// Generates IMU readings for a scenario and integrates them
pub struct ScenarioRunner<S: Scenario> {
    scenario: S,
    params: PreintegrationParams,
    imu_sample_time: f64,
    /// Bias added to every synthesized reading
    bias: ConstantBias,
}
impl<S: Scenario> ScenarioRunner<S> {
    pub fn new(
        scenario: S,
        params: PreintegrationParams,
        imu_sample_time: f64,
        bias: ConstantBias,
    ) -> Result<Self> {
        if !imu_sample_time.is_finite() || imu_sample_time <= 0.0 {
            return Err(PreintegrationError::InvalidInput(format!(
                "IMU sample time must be positive and finite, got {imu_sample_time}"
            )));
        }
        params.validate()?;
        Ok(ScenarioRunner {
            scenario,
            params,
            imu_sample_time,
            bias,
        })
    }
    pub fn scenario(&self) -> &S {
        &self.scenario
    }
    pub fn params(&self) -> &PreintegrationParams {
        &self.params
    }
    pub fn imu_sample_time(&self) -> f64 {
        self.imu_sample_time
    }
    /// Biased, noiseless gyroscope reading at `t`, in the sensor frame
    pub fn measured_omega(&self, t: f64) -> Vector3<f64> {
        let omega = self.scenario.omega_body(t);
        let omega_sensor = match &self.params.body_p_sensor {
            Some(body_p_sensor) => body_p_sensor.rotation.inverse() * omega,
            None => omega,
        };
        omega_sensor + self.bias.gyroscope
    }
    /// Biased, noiseless accelerometer reading at `t`, in the sensor frame
    ///
    /// An offset sensor also feels the centripetal acceleration of its lever arm. Angular
    /// acceleration is not modeled, which is exact for the constant-rate scenarios here.
    pub fn measured_specific_force(&self, t: f64) -> Vector3<f64> {
        let force = self.scenario.specific_force_body(t, &self.params.gravity);
        let force_sensor = match &self.params.body_p_sensor {
            Some(body_p_sensor) => {
                let omega = vector_to_skew_symmetric(&self.scenario.omega_body(t));
                body_p_sensor.rotation.inverse()
                    * (force + omega * omega * body_p_sensor.translation)
            }
            None => force,
        };
        force_sensor + self.bias.accelerometer
    }
    fn sample_count(&self, duration: f64) -> usize {
        (duration / self.imu_sample_time).round().max(0.0) as usize
    }
    /// Noiseless readings covering `[0, duration)`
    pub fn measurements(&self, duration: f64) -> Vec<ImuMeasurement> {
        let dt = self.imu_sample_time;
        (0..self.sample_count(duration))
            .map(|k| {
                let t = k as f64 * dt;
                ImuMeasurement::new(self.measured_specific_force(t), self.measured_omega(t), dt)
            })
            .collect()
    }
    /// Readings covering `[0, duration)` with white noise drawn from the configured
    /// accelerometer and gyroscope covariances, reproducible for a given `seed`
    pub fn noisy_measurements(&self, duration: f64, seed: u64) -> Vec<ImuMeasurement> {
        let dt = self.imu_sample_time;
        // continuous-time densities become per-sample standard deviations over dt
        let acc_sqrt = matrix_square_root(&self.params.accelerometer_covariance) / dt.sqrt();
        let gyro_sqrt = matrix_square_root(&self.params.gyroscope_covariance) / dt.sqrt();
        let mut sampler = GaussianSampler::new(seed);
        self.measurements(duration)
            .into_iter()
            .map(|m| {
                let acc = m.acc + acc_sqrt * sampler.standard_vector();
                let omega = m.omega + gyro_sqrt * sampler.standard_vector();
                ImuMeasurement::new(acc, omega, m.dt)
            })
            .collect()
    }
    /// Preintegrate noiseless readings over `[0, duration)` about `bias_hat`
    pub fn integrate(&self, duration: f64, bias_hat: ConstantBias) -> Result<PreintegratedMeasurements> {
        let mut pim = PreintegratedMeasurements::new(self.params, bias_hat)?;
        pim.integrate_measurements(&self.measurements(duration))?;
        Ok(pim)
    }
    /// Preintegrate noisy readings over `[0, duration)` about `bias_hat`
    pub fn integrate_noisy(
        &self,
        duration: f64,
        bias_hat: ConstantBias,
        seed: u64,
    ) -> Result<PreintegratedMeasurements> {
        let mut pim = PreintegratedMeasurements::new(self.params, bias_hat)?;
        pim.integrate_measurements(&self.noisy_measurements(duration, seed))?;
        Ok(pim)
    }
    /// Predict the end state of `pim` from the true state at time zero
    pub fn predict(&self, pim: &PreintegratedMeasurements, bias: &ConstantBias) -> (Pose3, Vector3<f64>) {
        pim.predict(
            &self.scenario.pose(0.0),
            &self.scenario.velocity_nav(0.0),
            bias,
            &self.params.gravity,
            &self.params.omega_coriolis,
            self.params.use_2nd_order_coriolis,
        )
    }
}

/// Seeded source of independent standard normal vectors
pub(crate) struct GaussianSampler {
    rng: StdRng,
}
impl GaussianSampler {
    pub(crate) fn new(seed: u64) -> Self {
        GaussianSampler {
            rng: StdRng::seed_from_u64(seed),
        }
    }
    pub(crate) fn standard_vector(&mut self) -> Vector3<f64> {
        Vector3::from_fn(|_, _| self.rng.sample(StandardNormal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerical::numerical_jacobian;
    use crate::so3::log_map;
    use nalgebra::Vector1;

    fn rotation_error(a: &Rotation3<f64>, b: &Rotation3<f64>) -> f64 {
        log_map((a.inverse() * b).matrix()).norm()
    }
    fn time_derivative<F: Fn(f64) -> Vector3<f64>>(f: F, t: f64) -> Vector3<f64> {
        numerical_jacobian(|x: &Vector1<f64>| f(x[0]), &Vector1::new(t), 1e-5)
    }

    #[test]
    fn stationary_reads_gravity() {
        let params = PreintegrationParams::default();
        let runner =
            ScenarioRunner::new(StationaryScenario::default(), params, 0.1, ConstantBias::default())
                .unwrap();
        let f = runner.measured_specific_force(3.0);
        assert!((f - Vector3::new(0.0, 0.0, 9.81)).norm() < 1e-12);
        assert_eq!(runner.measurements(1.0).len(), 10);
    }
    #[test]
    fn constant_twist_is_consistent() {
        let scenario = ConstantTwistScenario {
            initial_pose: Pose3::from_euler_translation(0.1, 0.2, -0.3, Vector3::new(1.0, 2.0, 3.0)),
            omega: Vector3::new(0.0, 0.1, 0.4),
            velocity: Vector3::new(2.0, 0.0, 0.1),
        };
        for t in [0.0, 0.7, 3.0] {
            let dp = time_derivative(|s| scenario.pose(s).translation, t);
            assert!((dp - scenario.velocity_nav(t)).norm() < 1e-8);
            let dv = time_derivative(|s| scenario.velocity_nav(s), t);
            assert!((dv - scenario.acceleration_nav(t)).norm() < 1e-8);
            assert!((scenario.velocity_body(t) - scenario.velocity).norm() < 1e-12);
        }
    }
    #[test]
    fn accelerating_without_rotation_is_exact() {
        let scenario = AcceleratingScenario {
            initial_pose: Pose3::from_euler_translation(0.0, 0.0, 0.5, Vector3::new(5.0, 0.0, 1.0)),
            initial_velocity: Vector3::new(1.0, -1.0, 0.0),
            acceleration: Vector3::new(0.2, 0.1, -0.3),
            omega: Vector3::zeros(),
        };
        let runner = ScenarioRunner::new(
            scenario,
            PreintegrationParams::default(),
            0.01,
            ConstantBias::default(),
        )
        .unwrap();
        let pim = runner.integrate(2.0, ConstantBias::default()).unwrap();
        let (pose, vel) = runner.predict(&pim, &ConstantBias::default());
        let t = pim.delta_t_ij();
        assert!((pose.translation - scenario.pose(t).translation).norm() < 1e-9);
        assert!((vel - scenario.velocity_nav(t)).norm() < 1e-9);
        assert!(rotation_error(&pose.rotation, &scenario.rotation(t)) < 1e-12);
    }
    #[test]
    fn known_bias_is_removed() {
        let scenario = ConstantTwistScenario {
            initial_pose: Pose3::identity(),
            omega: Vector3::new(0.0, 0.0, 0.3),
            velocity: Vector3::new(1.0, 0.0, 0.0),
        };
        let bias = ConstantBias::new(Vector3::new(0.1, -0.2, 0.05), Vector3::new(0.01, 0.0, -0.02));
        let runner = ScenarioRunner::new(scenario, PreintegrationParams::default(), 0.001, bias).unwrap();
        let pim = runner.integrate(1.0, bias).unwrap();
        let (pose, vel) = runner.predict(&pim, &bias);
        assert!(rotation_error(&pose.rotation, &scenario.rotation(1.0)) < 1e-9);
        assert!((vel - scenario.velocity_nav(1.0)).norm() < 1e-2);
        assert!((pose.translation - scenario.pose(1.0).translation).norm() < 1e-2);
    }
    #[test]
    fn sensor_offset_is_undone() {
        // climbing while spinning about gravity has constant readings, so integration is exact
        let scenario = ConstantTwistScenario {
            initial_pose: Pose3::new(Rotation3::identity(), Vector3::new(0.0, 0.0, 1.0)),
            omega: Vector3::new(0.0, 0.0, 0.4),
            velocity: Vector3::new(0.0, 0.0, 0.5),
        };
        let body_p_sensor = Pose3::from_euler_translation(0.1, 0.2, 0.3, Vector3::new(0.1, 0.0, 0.05));
        let params = PreintegrationParams::default().with_body_p_sensor(body_p_sensor);
        let runner = ScenarioRunner::new(scenario, params, 0.01, ConstantBias::default()).unwrap();
        let pim = runner.integrate(2.0, ConstantBias::default()).unwrap();
        let (pose, vel) = runner.predict(&pim, &ConstantBias::default());
        assert!(rotation_error(&pose.rotation, &scenario.rotation(2.0)) < 1e-9);
        assert!((vel - scenario.velocity_nav(2.0)).norm() < 1e-8);
        assert!((pose.translation - scenario.pose(2.0).translation).norm() < 1e-8);
    }
    #[test]
    fn noise_is_reproducible() {
        let runner = ScenarioRunner::new(
            StationaryScenario::default(),
            PreintegrationParams::default(),
            0.01,
            ConstantBias::default(),
        )
        .unwrap();
        let a = runner.noisy_measurements(0.5, 7);
        let b = runner.noisy_measurements(0.5, 7);
        let c = runner.noisy_measurements(0.5, 8);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 50);
    }
    #[test]
    fn invalid_sample_time_is_rejected() {
        let result = ScenarioRunner::new(
            StationaryScenario::default(),
            PreintegrationParams::default(),
            0.0,
            ConstantBias::default(),
        );
        assert!(matches!(result, Err(PreintegrationError::InvalidInput(_))));
    }
}
