//! IMU record files, interval splitting and serializable preintegration summaries.
//!
//! This module provides:
//! - A struct (`ImuRecord`) for reading and writing timestamped IMU samples to/from CSV files
//! - Splitting a record stream into fixed-length preintegration intervals
//! - `PreintegrationSummary` for exporting the result of each interval as JSON
//! - Generation of synthetic record streams from the scenarios in [`crate::scenario`]
use clap::ValueEnum;
use log::{debug, trace};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;

use crate::bias::ConstantBias;
use crate::error::{PreintegrationError, Result};
use crate::params::PreintegrationParams;
use crate::pose::Pose3;
use crate::preintegration::{ImuMeasurement, PreintegratedMeasurements};
use crate::scenario::{
    AcceleratingScenario, ConstantTwistScenario, Scenario, ScenarioRunner, StationaryScenario,
};
use crate::so3::So3;

/// One timestamped IMU sample
///
/// The reading is assumed constant from `time` until the time of the next record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImuRecord {
    /// Time in seconds
    pub time: f64,
    /// Specific force in the sensor frame (m/s^2)
    pub acc_x: f64,
    pub acc_y: f64,
    pub acc_z: f64,
    /// Angular rate in the sensor frame (rad/s)
    pub gyro_x: f64,
    pub gyro_y: f64,
    pub gyro_z: f64,
}
impl ImuRecord {
    pub fn new(time: f64, acc: &Vector3<f64>, gyro: &Vector3<f64>) -> Self {
        ImuRecord {
            time,
            acc_x: acc[0],
            acc_y: acc[1],
            acc_z: acc[2],
            gyro_x: gyro[0],
            gyro_y: gyro[1],
            gyro_z: gyro[2],
        }
    }
    pub fn acc(&self) -> Vector3<f64> {
        Vector3::new(self.acc_x, self.acc_y, self.acc_z)
    }
    pub fn gyro(&self) -> Vector3<f64> {
        Vector3::new(self.gyro_x, self.gyro_y, self.gyro_z)
    }
}

/// Reads IMU records from a CSV file with a `time,acc_x,acc_y,acc_z,gyro_x,gyro_y,gyro_z` header.
pub fn read_imu_csv<P: AsRef<Path>>(path: P) -> Result<Vec<ImuRecord>> {
    let mut rdr = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: ImuRecord = result?;
        records.push(record);
    }
    Ok(records)
}

/// Writes IMU records to a CSV file.
pub fn write_imu_csv<P: AsRef<Path>>(records: &[ImuRecord], path: P) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// A run of consecutive samples that is preintegrated as one unit
#[derive(Debug, Clone, PartialEq)]
pub struct ImuInterval {
    pub start_time: f64,
    pub end_time: f64,
    pub measurements: Vec<ImuMeasurement>,
}

/// Timestamps within this fraction of an interval below a boundary count as on the boundary
const BOUNDARY_TOLERANCE: f64 = 1e-9;

/// Split a record stream into intervals of (at most) `interval` seconds
///
/// Each record's reading is held until the next record, so the last record only closes the
/// final sample. A sample belongs to the interval in which it starts; interval boundaries are
/// measured from the first timestamp. Boundaries are snapped by [`BOUNDARY_TOLERANCE`] so that
/// timestamps like `k * dt` that round just below a multiple of `interval` start the next
/// interval. Intervals without samples are omitted.
///
/// # Errors
/// `InvalidInput` when `interval` is not positive and finite, or when timestamps are not
/// finite and strictly increasing.
pub fn split_intervals(records: &[ImuRecord], interval: f64) -> Result<Vec<ImuInterval>> {
    if !interval.is_finite() || interval <= 0.0 {
        return Err(PreintegrationError::InvalidInput(format!(
            "interval length must be positive and finite, got {interval}"
        )));
    }
    if let Some(bad) = records.iter().find(|r| !r.time.is_finite()) {
        return Err(PreintegrationError::InvalidInput(format!(
            "non-finite timestamp {}",
            bad.time
        )));
    }
    let Some(first) = records.first() else {
        return Ok(Vec::new());
    };
    let t0 = first.time;
    let mut intervals: Vec<ImuInterval> = Vec::new();
    let mut current_index: Option<u64> = None;
    for pair in records.windows(2) {
        let (record, next) = (&pair[0], &pair[1]);
        let dt = next.time - record.time;
        if dt <= 0.0 {
            return Err(PreintegrationError::InvalidInput(format!(
                "timestamps must be strictly increasing: {} followed by {}",
                record.time, next.time
            )));
        }
        let index = ((record.time - t0) / interval + BOUNDARY_TOLERANCE).floor() as u64;
        if current_index != Some(index) {
            trace!("interval {} starts at {:.6} s", index, record.time);
            intervals.push(ImuInterval {
                start_time: record.time,
                end_time: record.time,
                measurements: Vec::new(),
            });
            current_index = Some(index);
        }
        if let Some(current) = intervals.last_mut() {
            current
                .measurements
                .push(ImuMeasurement::new(record.acc(), record.gyro(), dt));
            current.end_time = next.time;
        }
    }
    Ok(intervals)
}

/// Serializable result of preintegrating one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreintegrationSummary {
    pub start_time: f64,
    pub end_time: f64,
    pub sample_count: usize,
    /// Sum of the sample durations
    pub delta_t: f64,
    /// Rotation increment as a rotation vector (rad)
    pub delta_rotation: [f64; 3],
    pub delta_velocity: [f64; 3],
    pub delta_position: [f64; 3],
    /// Diagonal of the increment covariance, ordered [p, v, θ]
    pub covariance_diagonal: [f64; 9],
    /// Bias the increments were integrated about
    pub bias_hat: ConstantBias,
}
impl PreintegrationSummary {
    pub fn from_preintegrated(
        pim: &PreintegratedMeasurements,
        start_time: f64,
        end_time: f64,
        sample_count: usize,
    ) -> Self {
        let cov = pim.preint_meas_cov();
        PreintegrationSummary {
            start_time,
            end_time,
            sample_count,
            delta_t: pim.delta_t_ij(),
            delta_rotation: So3::log(pim.delta_r_ij()).into(),
            delta_velocity: (*pim.delta_v_ij()).into(),
            delta_position: (*pim.delta_p_ij()).into(),
            covariance_diagonal: std::array::from_fn(|i| cov[(i, i)]),
            bias_hat: *pim.bias_hat(),
        }
    }
}

/// Preintegrate one interval about `bias_hat`
pub fn preintegrate_interval(
    params: &PreintegrationParams,
    bias_hat: &ConstantBias,
    interval: &ImuInterval,
) -> Result<PreintegrationSummary> {
    let mut pim = PreintegratedMeasurements::new(*params, *bias_hat)?;
    pim.integrate_measurements(&interval.measurements)?;
    debug!(
        "preintegrated {} samples over [{:.3}, {:.3}]",
        interval.measurements.len(),
        interval.start_time,
        interval.end_time
    );
    Ok(PreintegrationSummary::from_preintegrated(
        &pim,
        interval.start_time,
        interval.end_time,
        interval.measurements.len(),
    ))
}

/// Write summaries as a pretty JSON array.
pub fn write_summaries_json<P: AsRef<Path>>(summaries: &[PreintegrationSummary], path: P) -> io::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, summaries).map_err(io::Error::other)
}

/// Read summaries written by [`write_summaries_json`].
pub fn read_summaries_json<P: AsRef<Path>>(path: P) -> io::Result<Vec<PreintegrationSummary>> {
    let file = File::open(path)?;
    serde_json::from_reader(file).map_err(io::Error::other)
}

/// Turn scenario readings into records sampled every `imu_sample_time` over `[0, duration]`
///
/// One extra record is emitted at `duration` so that the last sample has an end time. With a
/// seed the readings carry white noise from the runner's covariances.
pub fn generate_records<S: Scenario>(
    runner: &ScenarioRunner<S>,
    duration: f64,
    seed: Option<u64>,
) -> Vec<ImuRecord> {
    let dt = runner.imu_sample_time();
    let span = duration + dt;
    let measurements = match seed {
        Some(seed) => runner.noisy_measurements(span, seed),
        None => runner.measurements(span),
    };
    measurements
        .iter()
        .enumerate()
        .map(|(k, m)| ImuRecord::new(k as f64 * dt, &m.acc, &m.omega))
        .collect()
}

/// Built-in trajectories available to the `simulate` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioKind {
    #[default]
    Stationary,
    Accelerating,
    Twist,
}

/// Description of a synthetic IMU record stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub kind: ScenarioKind,
    pub duration_s: f64,
    pub sample_rate_hz: f64,
    /// Noise seed; readings are noiseless when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Body angular rate (rad/s), unused by the stationary scenario
    #[serde(default)]
    pub omega: [f64; 3],
    /// Initial navigation velocity for `accelerating`, body velocity for `twist` (m/s)
    #[serde(default)]
    pub velocity: [f64; 3],
    /// Navigation acceleration for `accelerating` (m/s^2)
    #[serde(default)]
    pub acceleration: [f64; 3],
}
impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            kind: ScenarioKind::Stationary,
            duration_s: 10.0,
            sample_rate_hz: 100.0,
            seed: None,
            omega: [0.0; 3],
            velocity: [0.0; 3],
            acceleration: [0.0; 3],
        }
    }
}
impl ScenarioConfig {
    /// Generate records for this scenario with the sensor carrying `true_bias`
    pub fn generate(&self, params: &PreintegrationParams, true_bias: &ConstantBias) -> Result<Vec<ImuRecord>> {
        if !self.duration_s.is_finite() || self.duration_s < 0.0 {
            return Err(PreintegrationError::InvalidInput(format!(
                "scenario duration must be non-negative, got {}",
                self.duration_s
            )));
        }
        if !self.sample_rate_hz.is_finite() || self.sample_rate_hz <= 0.0 {
            return Err(PreintegrationError::InvalidInput(format!(
                "sample rate must be positive, got {}",
                self.sample_rate_hz
            )));
        }
        let dt = 1.0 / self.sample_rate_hz;
        let omega = Vector3::from(self.omega);
        let velocity = Vector3::from(self.velocity);
        let records = match self.kind {
            ScenarioKind::Stationary => {
                let runner = ScenarioRunner::new(StationaryScenario::default(), *params, dt, *true_bias)?;
                generate_records(&runner, self.duration_s, self.seed)
            }
            ScenarioKind::Accelerating => {
                let scenario = AcceleratingScenario {
                    initial_pose: Pose3::identity(),
                    initial_velocity: velocity,
                    acceleration: Vector3::from(self.acceleration),
                    omega,
                };
                let runner = ScenarioRunner::new(scenario, *params, dt, *true_bias)?;
                generate_records(&runner, self.duration_s, self.seed)
            }
            ScenarioKind::Twist => {
                let scenario = ConstantTwistScenario {
                    initial_pose: Pose3::identity(),
                    omega,
                    velocity,
                };
                let runner = ScenarioRunner::new(scenario, *params, dt, *true_bias)?;
                generate_records(&runner, self.duration_s, self.seed)
            }
        };
        Ok(records)
    }
}
