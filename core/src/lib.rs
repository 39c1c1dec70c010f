//! On-manifold IMU preintegration and inertial factors
//!
//! This crate summarizes the raw inertial samples recorded between two keyframes `i` and `j`
//! into a single relative-motion measurement (rotation, velocity and position increments)
//! together with its covariance and its first-order sensitivity to the IMU bias. The summary
//! constrains the pose, velocity and bias of the two keyframes through a residual whose
//! analytic Jacobians are what a Gauss-Newton style optimizer needs. When the optimizer moves
//! the bias estimate, the increments are corrected to first order instead of reintegrating the
//! raw samples.
//!
//! The formulation follows _On-Manifold Preintegration for Real-Time Visual-Inertial Odometry_
//! by Forster, Carlone, Dellaert and Scaramuzza, and the preintegrated IMU factor of Lupton and
//! Sukkarieh. In general, variables are named for the quantity they represent rather than for
//! the symbol used in the papers (`delta_v_ij` rather than `Δv_ij`), and the papers' symbols are
//! reserved for documentation.
//!
//! This crate is primarily built off of:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): fixed-size linear algebra and rotation types.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): seeded noise for simulated IMU readings.
//! - [`serde`](https://crates.io/crates/serde) and [`csv`](https://crates.io/crates/csv): configuration files and IMU record files.
//!
//! ## Crate overview
//!
//! - [so3]: rotation exponential/logarithm maps, right Jacobians and the [`so3::So3`] abstraction.
//! - [pose]: rigid-body pose with the retraction used by the factor Jacobians.
//! - [bias]: constant accelerometer/gyroscope bias and raw-sample correction, including the sensor mounting offset.
//! - [params]: noise and frame parameters, IMU quality presets and file-backed configuration.
//! - [linalg]: symmetrization, definiteness checks and jittered Cholesky factorization.
//! - [noise]: Gaussian noise model used to whiten factor residuals.
//! - [preintegration]: the preintegrated-measurement accumulator.
//! - [factor]: residual, Jacobians and prediction; the [`factor::ImuFactor`].
//! - [tangent]: tangent-space form of the per-sample update with exact Jacobians.
//! - [numerical]: central-difference Jacobians used to verify every analytic derivative.
//! - [scenario]: closed-form trajectories that synthesize IMU readings with exact ground truth.
//! - [sim]: IMU record files, interval splitting and JSON summaries.
//!
//! ## Preintegrated increments
//!
//! Given bias-corrected samples $(\tilde{a}_k, \tilde{\omega}_k, \Delta t_k)$, the increments
//! start at identity/zero and are updated, in this order, as
//!
//! $$
//! \begin{aligned}
//! \Delta p_{i,k+1} &= \Delta p_{ik} + \Delta v_{ik}\Delta t_k + \tfrac{1}{2}\Delta R_{ik}\,\tilde{a}_k\,\Delta t_k^2 \\\\
//! \Delta v_{i,k+1} &= \Delta v_{ik} + \Delta R_{ik}\,\tilde{a}_k\,\Delta t_k \\\\
//! \Delta R_{i,k+1} &= \Delta R_{ik}\,\mathrm{Exp}(\tilde{\omega}_k\Delta t_k)
//! \end{aligned}
//! $$
//!
//! The $\tfrac{1}{2}$ term is present only with second-order position integration. The
//! increments are independent of gravity, the initial state and Coriolis effects; those enter
//! only when the factor is evaluated.
//!
//! ## State ordering
//!
//! Increment covariances and residuals are 9-vectors ordered $[\delta p, \delta v, \delta\theta]$.
//! Pose tangents are ordered $[\delta\theta, \delta t]$ with the retraction
//! $(R\,\mathrm{Exp}(\delta\theta),\ t + R\,\delta t)$, and bias tangents are ordered
//! $[\delta b_a, \delta b_g]$.
//!
//! ## Frames
//!
//! Rotations are body-to-navigation. Gravity is a navigation-frame vector; the default is
//! $(0, 0, -9.81)$, i.e. a z-up navigation frame. The crate does not enforce a convention: it
//! only requires the gravity and the Coriolis rate to be expressed in the same navigation frame
//! as the poses and velocities handed to the factor.
use nalgebra::{SMatrix, SVector};

pub mod bias;
pub mod error;
pub mod factor;
pub mod linalg;
pub mod noise;
pub mod numerical;
pub mod params;
pub mod pose;
pub mod preintegration;
pub mod scenario;
pub mod sim;
pub mod so3;
pub mod tangent;

pub use bias::ConstantBias;
pub use error::{PreintegrationError, Result};
pub use factor::{ImuFactor, ImuFactorJacobians, JacobianRequest};
pub use noise::GaussianNoiseModel;
pub use params::{IMUQuality, PreintegrationConfig, PreintegrationParams};
pub use pose::Pose3;
pub use preintegration::{ImuMeasurement, PreintegratedMeasurements};
pub use so3::So3;

/// 9×9 matrix over the `[p, v, θ]` increment tangent space
pub type Matrix9 = SMatrix<f64, 9, 9>;
/// Residual or increment 9-vector ordered `[p, v, θ]`
pub type Vector9 = SVector<f64, 9>;
pub type Matrix93 = SMatrix<f64, 9, 3>;
pub type Matrix96 = SMatrix<f64, 9, 6>;

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Rotation3, Vector3};

    #[test]
    fn stationary_end_to_end() {
        // ten 0.1 s samples of a level IMU at rest
        let params = PreintegrationParams::default();
        let mut pim = PreintegratedMeasurements::<Rotation3<f64>>::new(params, ConstantBias::default()).unwrap();
        for _ in 0..10 {
            pim.integrate_measurement(&Vector3::new(0.0, 0.0, 9.81), &Vector3::zeros(), 0.1)
                .unwrap();
        }
        let g = params.gravity;
        let t = pim.delta_t_ij();
        assert!(So3::log(pim.delta_r_ij()).norm() < 1e-12);
        assert!((pim.delta_v_ij() + g * t).norm() < 1e-9);
        assert!((pim.delta_p_ij() + 0.5 * g * t * t).norm() < 1e-9);

        let factor = ImuFactor::new(pim).unwrap();
        let pose = Pose3::identity();
        let (residual, jacobians) = factor.evaluate_error(
            &pose,
            &Vector3::zeros(),
            &pose,
            &Vector3::zeros(),
            &ConstantBias::default(),
            JacobianRequest::NONE,
        );
        assert!(residual.norm() < 1e-9);
        assert!(jacobians.pose_i.is_none());
    }
}
