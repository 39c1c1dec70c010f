//! Constant IMU bias model and measurement correction
//!
//! Raw accelerometer and gyroscope readings are corrected with a bias estimate and, when the
//! IMU is not mounted at the body origin, re-expressed in the body frame. The correction
//! also reports how the corrected sample moves with the bias, which the preintegration
//! recursion chains into its bias Jacobians.
use nalgebra::{Matrix3, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::ops::{Add, Sub};

use crate::pose::Pose3;
use crate::so3::vector_to_skew_symmetric;

/// Accelerometer and gyroscope biases, assumed constant over one preintegration interval
///
/// The tangent vector of a bias is ordered `[accelerometer, gyroscope]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstantBias {
    /// Accelerometer bias in m/s^2 (sensor frame)
    #[serde(default = "Vector3::zeros")]
    pub accelerometer: Vector3<f64>,
    /// Gyroscope bias in rad/s (sensor frame)
    #[serde(default = "Vector3::zeros")]
    pub gyroscope: Vector3<f64>,
}
impl Display for ConstantBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConstantBias {{ acc: [{:.6}, {:.6}, {:.6}], gyro: [{:.6}, {:.6}, {:.6}] }}",
            self.accelerometer[0],
            self.accelerometer[1],
            self.accelerometer[2],
            self.gyroscope[0],
            self.gyroscope[1],
            self.gyroscope[2]
        )
    }
}
impl From<Vector6<f64>> for ConstantBias {
    fn from(v: Vector6<f64>) -> Self {
        ConstantBias {
            accelerometer: Vector3::new(v[0], v[1], v[2]),
            gyroscope: Vector3::new(v[3], v[4], v[5]),
        }
    }
}
impl From<ConstantBias> for Vector6<f64> {
    fn from(bias: ConstantBias) -> Self {
        bias.vector()
    }
}
impl Add for ConstantBias {
    type Output = ConstantBias;
    fn add(self, rhs: ConstantBias) -> ConstantBias {
        ConstantBias::new(
            self.accelerometer + rhs.accelerometer,
            self.gyroscope + rhs.gyroscope,
        )
    }
}
impl Sub for ConstantBias {
    type Output = ConstantBias;
    fn sub(self, rhs: ConstantBias) -> ConstantBias {
        ConstantBias::new(
            self.accelerometer - rhs.accelerometer,
            self.gyroscope - rhs.gyroscope,
        )
    }
}

/// A bias-corrected IMU sample expressed in the body frame, together with its sensitivity
/// to the bias
#[derive(Clone, Copy, Debug)]
pub struct CorrectedMeasurement {
    /// Corrected specific force in the body frame
    pub acc: Vector3<f64>,
    /// Corrected angular rate in the body frame
    pub omega: Vector3<f64>,
    /// ∂acc/∂b_a
    pub acc_h_bias_acc: Matrix3<f64>,
    /// ∂acc/∂b_g, non-zero only when a lever arm couples the angular rate into the linear reading
    pub acc_h_bias_omega: Matrix3<f64>,
    /// ∂omega/∂b_g
    pub omega_h_bias_omega: Matrix3<f64>,
}

impl ConstantBias {
    pub fn new(accelerometer: Vector3<f64>, gyroscope: Vector3<f64>) -> Self {
        ConstantBias {
            accelerometer,
            gyroscope,
        }
    }
    /// Stacked `[accelerometer, gyroscope]` vector
    pub fn vector(&self) -> Vector6<f64> {
        let a = &self.accelerometer;
        let g = &self.gyroscope;
        Vector6::new(a[0], a[1], a[2], g[0], g[1], g[2])
    }
    /// Additive retraction on the bias tangent space
    pub fn retract(&self, delta: &Vector6<f64>) -> Self {
        *self + ConstantBias::from(*delta)
    }
    pub fn correct_accelerometer(&self, measured_acc: &Vector3<f64>) -> Vector3<f64> {
        measured_acc - self.accelerometer
    }
    pub fn correct_gyroscope(&self, measured_omega: &Vector3<f64>) -> Vector3<f64> {
        measured_omega - self.gyroscope
    }
    /// Correct a raw sample for bias and, optionally, for the sensor mounting offset
    ///
    /// With a mounting pose `body_P_sensor = (R_bs, t_bs)` the angular rate is rotated into
    /// the body frame, `ω_b = R_bs(ω_s - b_g)`, and the centripetal acceleration seen at the
    /// lever arm is removed from the linear reading:
    ///
    /// $$
    /// a_b = R_{bs}(a_s - b_a) - [\omega_b]_\times^2\, t_{bs}
    /// $$
    ///
    /// # Arguments
    /// * `measured_acc` - raw specific force in the sensor frame
    /// * `measured_omega` - raw angular rate in the sensor frame
    /// * `body_p_sensor` - optional pose of the sensor in the body frame
    pub fn correct_measurements(
        &self,
        measured_acc: &Vector3<f64>,
        measured_omega: &Vector3<f64>,
        body_p_sensor: Option<&Pose3>,
    ) -> CorrectedMeasurement {
        let acc = self.correct_accelerometer(measured_acc);
        let omega = self.correct_gyroscope(measured_omega);
        match body_p_sensor {
            None => CorrectedMeasurement {
                acc,
                omega,
                acc_h_bias_acc: -Matrix3::identity(),
                acc_h_bias_omega: Matrix3::zeros(),
                omega_h_bias_omega: -Matrix3::identity(),
            },
            Some(sensor) => {
                let body_r_sensor = *sensor.rotation.matrix();
                let lever_arm = sensor.translation;
                let omega_body = body_r_sensor * omega;
                let omega_skew = vector_to_skew_symmetric(&omega_body);
                let acc_body = body_r_sensor * acc - omega_skew * omega_skew * lever_arm;
                // ∂([ω]ₓ²t)/∂ω = -[ω×t]ₓ - [ω]ₓ[t]ₓ
                let centripetal_h_omega = -vector_to_skew_symmetric(&omega_body.cross(&lever_arm))
                    - omega_skew * vector_to_skew_symmetric(&lever_arm);
                let omega_h_bias_omega = -body_r_sensor;
                CorrectedMeasurement {
                    acc: acc_body,
                    omega: omega_body,
                    acc_h_bias_acc: -body_r_sensor,
                    acc_h_bias_omega: -centripetal_h_omega * omega_h_bias_omega,
                    omega_h_bias_omega,
                }
            }
        }
    }
}
