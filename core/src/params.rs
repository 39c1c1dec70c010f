//! Preintegration parameters, measurement noise and their file-based configuration
//!
//! [`PreintegrationParams`] is the runtime configuration handed to the engine and the factor.
//! [`PreintegrationConfig`] is its serializable form, written and read as JSON, YAML or TOML
//! and converted into validated parameters with [`PreintegrationConfig::to_params`].
use nalgebra::{Matrix3, SMatrix, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use crate::bias::ConstantBias;
use crate::error::{PreintegrationError, Result};
use crate::linalg::is_positive_semi_definite;
use crate::pose::Pose3;

/// Magnitude of the gravity vector used by the defaults, m/s^2
pub const DEFAULT_GRAVITY: f64 = 9.81;
/// Relative tolerance used when checking configured covariances
const COVARIANCE_TOLERANCE: f64 = 1e-9;

/// General IMU quality grades with typical noise characteristics
///
/// | Grade      | Gyro ARW (deg/√h) | Accel VRW (m/s/√h) | Typical technology |
/// |------------|-------------------|--------------------|--------------------|
/// | Consumer   | 1.0               | 0.1                | Low-cost MEMS      |
/// | Industrial | 0.1               | 0.03               | High-end MEMS      |
/// | Tactical   | 0.01              | 0.01               | High-MEMS / FOG    |
/// | Navigation | 0.005             | 0.005              | FOG / RLG          |
/// | Strategic  | 0.0005            | 0.0001             | High-end RLG       |
///
/// The random walk figures convert to the continuous-time white noise densities used by the
/// preintegration covariance: a density in units per √Hz is the per-√h figure divided by 60.
///
/// # References
/// - Principles of GNSS, Inertial, and Multisensor Navigation Systems. Chapter 4.4.1, Paul D. Groves, 2nd Edition. Table 4.1
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IMUQuality {
    /// Low cost MEMS sensors found in consumer electronics (e.g. smartphones), wearables, and basic drones
    #[default]
    Consumer,
    /// Higher-end MEMS sensors found in automotive, robotics, and commercial drones
    Industrial,
    /// Fiber-Optic Gyroscopes (FOGs) found in military and high-performance applications
    Tactical,
    /// High end FOG or Ring-Laser Gyros (RLGs) for aircraft, ships, and submarines
    Navigation,
    /// Survey grade RLGs
    Strategic,
}
impl IMUQuality {
    /// Typical gyro angle random walk in radians per root hour
    pub fn gyro_angle_random_walk(&self) -> f64 {
        match self {
            IMUQuality::Consumer => 1.0_f64.to_radians(),
            IMUQuality::Industrial => 0.1_f64.to_radians(),
            IMUQuality::Tactical => 0.01_f64.to_radians(),
            IMUQuality::Navigation => 0.005_f64.to_radians(),
            IMUQuality::Strategic => 0.0005_f64.to_radians(),
        }
    }
    /// Typical accelerometer velocity random walk in m/s/√h
    pub fn accel_velocity_random_walk(&self) -> f64 {
        match self {
            IMUQuality::Consumer => 0.1,
            IMUQuality::Industrial => 0.03,
            IMUQuality::Tactical => 0.01,
            IMUQuality::Navigation => 0.005,
            IMUQuality::Strategic => 0.0001,
        }
    }
    /// Gyroscope white noise density in rad/s/√Hz
    pub fn gyro_noise_density(&self) -> f64 {
        self.gyro_angle_random_walk() / 60.0
    }
    /// Accelerometer white noise density in m/s^2/√Hz
    pub fn accel_noise_density(&self) -> f64 {
        self.accel_velocity_random_walk() / 60.0
    }
}

/// Block-diagonal continuous-time noise of one IMU sample
///
/// The three blocks are, in order, the integration error covariance, the accelerometer noise
/// covariance and the gyroscope noise covariance. Each is symmetric positive semi-definite;
/// off-diagonal blocks are zero.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeasurementNoise {
    integration: Matrix3<f64>,
    accelerometer: Matrix3<f64>,
    gyroscope: Matrix3<f64>,
}
impl MeasurementNoise {
    /// Validate and assemble the three covariance blocks
    pub fn new(
        integration: Matrix3<f64>,
        accelerometer: Matrix3<f64>,
        gyroscope: Matrix3<f64>,
    ) -> Result<Self> {
        check_covariance("integration", &integration)?;
        check_covariance("accelerometer", &accelerometer)?;
        check_covariance("gyroscope", &gyroscope)?;
        Ok(MeasurementNoise {
            integration,
            accelerometer,
            gyroscope,
        })
    }
    pub fn integration(&self) -> &Matrix3<f64> {
        &self.integration
    }
    pub fn accelerometer(&self) -> &Matrix3<f64> {
        &self.accelerometer
    }
    pub fn gyroscope(&self) -> &Matrix3<f64> {
        &self.gyroscope
    }
    /// The full 9×9 block-diagonal matrix
    pub fn matrix(&self) -> SMatrix<f64, 9, 9> {
        let mut q = SMatrix::<f64, 9, 9>::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).copy_from(&self.integration);
        q.fixed_view_mut::<3, 3>(3, 3).copy_from(&self.accelerometer);
        q.fixed_view_mut::<3, 3>(6, 6).copy_from(&self.gyroscope);
        q
    }
}

fn check_covariance(name: &str, m: &Matrix3<f64>) -> Result<()> {
    if is_positive_semi_definite(m, COVARIANCE_TOLERANCE) {
        Ok(())
    } else {
        Err(PreintegrationError::InvalidCovariance(format!(
            "{name} covariance must be symmetric positive semi-definite, got {m:?}"
        )))
    }
}

/// Runtime parameters shared by the preintegration engine and the factor evaluator
///
/// The covariances are continuous-time: the discrete sample covariance is the block times the
/// sample interval. Gravity, the Coriolis rate and the second-order Coriolis flag are only
/// consumed by the factor evaluator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PreintegrationParams {
    /// Accelerometer white noise covariance, (m/s^2)^2/Hz
    pub accelerometer_covariance: Matrix3<f64>,
    /// Gyroscope white noise covariance, (rad/s)^2/Hz
    pub gyroscope_covariance: Matrix3<f64>,
    /// Covariance of the error made by integrating velocity into position
    pub integration_covariance: Matrix3<f64>,
    /// Include the ½·a·Δt² term when integrating position
    pub use_2nd_order_integration: bool,
    /// Pose of the IMU in the body frame, if it is not mounted at the body origin
    pub body_p_sensor: Option<Pose3>,
    /// Gravity in the navigation frame
    pub gravity: Vector3<f64>,
    /// Rotation rate of the navigation frame, e.g. the earth rate
    pub omega_coriolis: Vector3<f64>,
    /// Include the centrifugal terms of the Coriolis correction
    pub use_2nd_order_coriolis: bool,
}
impl Default for PreintegrationParams {
    fn default() -> Self {
        PreintegrationParams::from_quality(IMUQuality::default())
    }
}
impl Display for PreintegrationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PreintegrationParams {{ acc_cov_diag: [{:.3e}, {:.3e}, {:.3e}], gyro_cov_diag: [{:.3e}, {:.3e}, {:.3e}], \
             int_cov_diag: [{:.3e}, {:.3e}, {:.3e}], second_order: {}, sensor_offset: {}, gravity: [{:.4}, {:.4}, {:.4}] }}",
            self.accelerometer_covariance[(0, 0)],
            self.accelerometer_covariance[(1, 1)],
            self.accelerometer_covariance[(2, 2)],
            self.gyroscope_covariance[(0, 0)],
            self.gyroscope_covariance[(1, 1)],
            self.gyroscope_covariance[(2, 2)],
            self.integration_covariance[(0, 0)],
            self.integration_covariance[(1, 1)],
            self.integration_covariance[(2, 2)],
            self.use_2nd_order_integration,
            self.body_p_sensor.is_some(),
            self.gravity[0],
            self.gravity[1],
            self.gravity[2]
        )
    }
}
impl PreintegrationParams {
    /// Build validated parameters from the three continuous-time covariances
    ///
    /// Gravity defaults to `[0, 0, -DEFAULT_GRAVITY]` (z up), with no Coriolis rate and no
    /// sensor offset.
    pub fn new(
        accelerometer_covariance: Matrix3<f64>,
        gyroscope_covariance: Matrix3<f64>,
        integration_covariance: Matrix3<f64>,
        use_2nd_order_integration: bool,
    ) -> Result<Self> {
        let params = PreintegrationParams {
            accelerometer_covariance,
            gyroscope_covariance,
            integration_covariance,
            use_2nd_order_integration,
            body_p_sensor: None,
            gravity: Vector3::new(0.0, 0.0, -DEFAULT_GRAVITY),
            omega_coriolis: Vector3::zeros(),
            use_2nd_order_coriolis: false,
        };
        params.validate()?;
        Ok(params)
    }
    /// Isotropic covariances from the typical noise densities of an IMU grade
    pub fn from_quality(quality: IMUQuality) -> Self {
        PreintegrationParams {
            accelerometer_covariance: Matrix3::identity() * quality.accel_noise_density().powi(2),
            gyroscope_covariance: Matrix3::identity() * quality.gyro_noise_density().powi(2),
            integration_covariance: Matrix3::identity() * 1e-8,
            use_2nd_order_integration: true,
            body_p_sensor: None,
            gravity: Vector3::new(0.0, 0.0, -DEFAULT_GRAVITY),
            omega_coriolis: Vector3::zeros(),
            use_2nd_order_coriolis: false,
        }
    }
    pub fn with_gravity(mut self, gravity: Vector3<f64>) -> Self {
        self.gravity = gravity;
        self
    }
    pub fn with_coriolis(mut self, omega_coriolis: Vector3<f64>, use_2nd_order_coriolis: bool) -> Self {
        self.omega_coriolis = omega_coriolis;
        self.use_2nd_order_coriolis = use_2nd_order_coriolis;
        self
    }
    pub fn with_body_p_sensor(mut self, body_p_sensor: Pose3) -> Self {
        self.body_p_sensor = Some(body_p_sensor);
        self
    }
    /// Check the covariances and the frame vectors
    pub fn validate(&self) -> Result<()> {
        self.measurement_noise()?;
        if self.gravity.iter().chain(self.omega_coriolis.iter()).any(|x| !x.is_finite()) {
            return Err(PreintegrationError::InvalidInput(
                "gravity and coriolis rate must be finite".to_string(),
            ));
        }
        if let Some(sensor) = &self.body_p_sensor {
            if sensor.translation.iter().any(|x| !x.is_finite()) {
                return Err(PreintegrationError::InvalidInput(
                    "sensor offset must be finite".to_string(),
                ));
            }
        }
        Ok(())
    }
    /// The block-diagonal noise of one sample
    pub fn measurement_noise(&self) -> Result<MeasurementNoise> {
        MeasurementNoise::new(
            self.integration_covariance,
            self.accelerometer_covariance,
            self.gyroscope_covariance,
        )
    }
}

/// Mounting pose of the IMU in the body frame
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorOffsetConfig {
    /// Roll, pitch and yaw of the sensor frame in radians
    #[serde(default)]
    pub rpy: [f64; 3],
    /// Lever arm from the body origin to the sensor, meters
    #[serde(default)]
    pub translation: [f64; 3],
}
impl SensorOffsetConfig {
    pub fn to_pose(&self) -> Pose3 {
        Pose3::from_euler_translation(
            self.rpy[0],
            self.rpy[1],
            self.rpy[2],
            Vector3::from(self.translation),
        )
    }
}

/// Bias estimate the engine linearizes about
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BiasConfig {
    #[serde(default)]
    pub accelerometer: [f64; 3],
    #[serde(default)]
    pub gyroscope: [f64; 3],
}
impl From<BiasConfig> for ConstantBias {
    fn from(cfg: BiasConfig) -> Self {
        ConstantBias::new(Vector3::from(cfg.accelerometer), Vector3::from(cfg.gyroscope))
    }
}

/// Serializable preintegration configuration
///
/// Noise densities default to the preset of `imu_quality` when not given explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreintegrationConfig {
    #[serde(default)]
    pub imu_quality: IMUQuality,
    /// Accelerometer white noise density, m/s^2/√Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerometer_noise_density: Option<f64>,
    /// Gyroscope white noise density, rad/s/√Hz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyroscope_noise_density: Option<f64>,
    /// Standard deviation density of the velocity-to-position integration error
    #[serde(default = "default_integration_sigma")]
    pub integration_sigma: f64,
    #[serde(default = "default_true")]
    pub use_2nd_order_integration: bool,
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    #[serde(default)]
    pub omega_coriolis: [f64; 3],
    #[serde(default)]
    pub use_2nd_order_coriolis: bool,
    /// Length of one preintegration interval in seconds
    #[serde(default = "default_interval")]
    pub interval_s: f64,
    #[serde(default)]
    pub initial_bias: BiasConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_offset: Option<SensorOffsetConfig>,
}
fn default_integration_sigma() -> f64 {
    1e-4
}
fn default_true() -> bool {
    true
}
fn default_gravity() -> [f64; 3] {
    [0.0, 0.0, -DEFAULT_GRAVITY]
}
fn default_interval() -> f64 {
    1.0
}
impl Default for PreintegrationConfig {
    fn default() -> Self {
        PreintegrationConfig {
            imu_quality: IMUQuality::default(),
            accelerometer_noise_density: None,
            gyroscope_noise_density: None,
            integration_sigma: default_integration_sigma(),
            use_2nd_order_integration: true,
            gravity: default_gravity(),
            omega_coriolis: [0.0; 3],
            use_2nd_order_coriolis: false,
            interval_s: default_interval(),
            initial_bias: BiasConfig::default(),
            sensor_offset: None,
        }
    }
}
impl PreintegrationConfig {
    /// Convert into validated runtime parameters
    pub fn to_params(&self) -> Result<PreintegrationParams> {
        let acc_density = self
            .accelerometer_noise_density
            .unwrap_or_else(|| self.imu_quality.accel_noise_density());
        let gyro_density = self
            .gyroscope_noise_density
            .unwrap_or_else(|| self.imu_quality.gyro_noise_density());
        let mut params = PreintegrationParams::new(
            Matrix3::identity() * acc_density.powi(2),
            Matrix3::identity() * gyro_density.powi(2),
            Matrix3::identity() * self.integration_sigma.powi(2),
            self.use_2nd_order_integration,
        )?
        .with_gravity(Vector3::from(self.gravity))
        .with_coriolis(Vector3::from(self.omega_coriolis), self.use_2nd_order_coriolis);
        if let Some(offset) = &self.sensor_offset {
            params = params.with_body_p_sensor(offset.to_pose());
        }
        params.validate()?;
        Ok(params)
    }
    pub fn initial_bias(&self) -> ConstantBias {
        self.initial_bias.into()
    }
    /// Write the configuration as pretty JSON.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}
fn extension(p: &Path) -> Option<String> {
    p.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use tempfile::NamedTempFile;

    fn sample_cfg() -> PreintegrationConfig {
        PreintegrationConfig {
            imu_quality: IMUQuality::Tactical,
            accelerometer_noise_density: Some(2e-3),
            gyroscope_noise_density: None,
            interval_s: 0.5,
            omega_coriolis: [0.0, 0.0, 7.292115e-5],
            initial_bias: BiasConfig {
                accelerometer: [0.01, -0.02, 0.03],
                gyroscope: [1e-4, 0.0, -1e-4],
            },
            sensor_offset: Some(SensorOffsetConfig {
                rpy: [0.0, 0.0, 0.5],
                translation: [0.1, 0.0, -0.2],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn json_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("json");
        cfg.to_json(&path).unwrap();
        let loaded = PreintegrationConfig::from_json(&path).unwrap();
        assert_eq!(cfg, loaded);
    }
    #[test]
    fn yaml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("yaml");
        cfg.to_yaml(&path).unwrap();
        let loaded = PreintegrationConfig::from_yaml(&path).unwrap();
        assert_eq!(cfg, loaded);
    }
    #[test]
    fn toml_roundtrip() {
        let cfg = sample_cfg();
        let f = NamedTempFile::new().unwrap();
        let path = f.path().with_extension("toml");
        cfg.to_toml(&path).unwrap();
        let loaded = PreintegrationConfig::from_toml(&path).unwrap();
        assert_eq!(cfg, loaded);
    }
    #[test]
    fn generic_dispatch_roundtrip() {
        let cfg = PreintegrationConfig::default();
        for ext in ["json", "yaml", "yml", "toml"] {
            let f = NamedTempFile::new().unwrap();
            let path = f.path().with_extension(ext);
            cfg.to_file(&path).unwrap();
            let loaded = PreintegrationConfig::from_file(&path).unwrap();
            assert_eq!(cfg, loaded, "round trip through .{ext}");
        }
        let f = NamedTempFile::new().unwrap();
        let bad = f.path().with_extension("ini");
        assert!(cfg.to_file(&bad).is_err());
    }
    #[test]
    fn missing_fields_take_defaults() {
        let cfg: PreintegrationConfig = serde_json::from_str(r#"{"imu_quality": "navigation"}"#).unwrap();
        assert_eq!(cfg.imu_quality, IMUQuality::Navigation);
        assert!(cfg.use_2nd_order_integration);
        assert_eq!(cfg.gravity, [0.0, 0.0, -DEFAULT_GRAVITY]);
        assert_eq!(cfg.interval_s, 1.0);
    }
    #[test]
    fn config_to_params() {
        let cfg = sample_cfg();
        let params = cfg.to_params().unwrap();
        assert_approx_eq!(params.accelerometer_covariance[(1, 1)], 4e-6, 1e-18);
        let gyro_density = IMUQuality::Tactical.gyro_noise_density();
        assert_approx_eq!(params.gyroscope_covariance[(2, 2)], gyro_density * gyro_density, 1e-24);
        assert_eq!(params.gyroscope_covariance[(0, 1)], 0.0);
        let offset = params.body_p_sensor.expect("offset configured");
        assert_approx_eq!(offset.translation[2], -0.2, 1e-12);
        assert_approx_eq!(params.omega_coriolis[2], 7.292115e-5, 1e-15);
        assert_eq!(cfg.initial_bias().accelerometer, Vector3::new(0.01, -0.02, 0.03));
    }
    #[test]
    fn quality_densities_are_ordered() {
        let grades = [
            IMUQuality::Consumer,
            IMUQuality::Industrial,
            IMUQuality::Tactical,
            IMUQuality::Navigation,
            IMUQuality::Strategic,
        ];
        for pair in grades.windows(2) {
            assert!(pair[0].gyro_noise_density() > pair[1].gyro_noise_density());
            assert!(pair[0].accel_noise_density() > pair[1].accel_noise_density());
        }
        assert_approx_eq!(IMUQuality::Consumer.accel_noise_density(), 0.1 / 60.0, 1e-15);
    }
    #[test]
    fn invalid_covariances_are_rejected() {
        let mut bad = Matrix3::identity();
        bad[(0, 0)] = -1.0;
        let err = PreintegrationParams::new(bad, Matrix3::identity(), Matrix3::identity(), true);
        assert!(matches!(err, Err(PreintegrationError::InvalidCovariance(_))));
        let mut asymmetric = Matrix3::identity();
        asymmetric[(0, 2)] = 0.5;
        let err = MeasurementNoise::new(Matrix3::zeros(), Matrix3::identity(), asymmetric);
        assert!(matches!(err, Err(PreintegrationError::InvalidCovariance(_))));
        let params = PreintegrationParams::default().with_gravity(Vector3::new(0.0, f64::NAN, 0.0));
        assert!(matches!(params.validate(), Err(PreintegrationError::InvalidInput(_))));
    }
    #[test]
    fn noise_matrix_is_block_diagonal() {
        let noise = MeasurementNoise::new(
            Matrix3::identity() * 1.0,
            Matrix3::identity() * 2.0,
            Matrix3::identity() * 3.0,
        )
        .unwrap();
        let q = noise.matrix();
        assert_eq!(q[(0, 0)], 1.0);
        assert_eq!(q[(4, 4)], 2.0);
        assert_eq!(q[(8, 8)], 3.0);
        assert_eq!(q[(0, 3)], 0.0);
        assert_eq!(q[(6, 2)], 0.0);
    }
}
