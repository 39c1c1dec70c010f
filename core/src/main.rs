//! PREINT: generate and preintegrate IMU record files.
//!
//! - `simulate` writes an IMU CSV sampled from a closed-form scenario, optionally with seeded
//!   white noise and a constant sensor bias taken from the configuration.
//! - `integrate` reads an IMU CSV, splits it into fixed-length intervals and writes one
//!   preintegration summary per interval as JSON.
//!
//! Noise densities, gravity, the sensor mounting offset and the interval length come from a
//! configuration file (TOML/JSON/YAML) passed with `--config`; defaults are used otherwise.
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use log::info;
use rayon::prelude::*;
use std::path::PathBuf;

use preintegration::params::PreintegrationConfig;
use preintegration::sim::{
    PreintegrationSummary, ScenarioConfig, ScenarioKind, preintegrate_interval, read_imu_csv,
    split_intervals, write_imu_csv, write_summaries_json,
};

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Generate and preintegrate IMU record files.")]
struct Cli {
    /// Preintegration configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Preintegrate intervals in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Write an IMU CSV sampled from a scenario
    Simulate(SimulateArgs),
    /// Preintegrate an IMU CSV into per-interval JSON summaries
    Integrate(IntegrateArgs),
}

#[derive(Args)]
struct SimulateArgs {
    /// Output CSV path
    #[arg(short, long)]
    output: PathBuf,
    #[arg(long, value_enum, default_value_t = ScenarioKind::Stationary)]
    scenario: ScenarioKind,
    /// Duration in seconds
    #[arg(long, default_value_t = 10.0)]
    duration: f64,
    /// IMU sample rate in Hz
    #[arg(long, default_value_t = 100.0)]
    rate: f64,
    /// Seed for measurement noise; readings are noiseless when omitted
    #[arg(long)]
    seed: Option<u64>,
    /// Body angular rate, rad/s (x,y,z)
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.0, 0.0])]
    omega: Vec<f64>,
    /// Initial navigation velocity (accelerating) or body velocity (twist), m/s (x,y,z)
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.0, 0.0])]
    velocity: Vec<f64>,
    /// Navigation acceleration for the accelerating scenario, m/s^2 (x,y,z)
    #[arg(long, value_delimiter = ',', default_values_t = [0.0, 0.0, 0.0])]
    acceleration: Vec<f64>,
}

#[derive(Args)]
struct IntegrateArgs {
    /// Input IMU CSV path
    #[arg(short, long)]
    input: PathBuf,
    /// Output JSON path
    #[arg(short, long)]
    output: PathBuf,
    /// Interval length in seconds, overrides the configuration
    #[arg(long)]
    interval: Option<f64>,
}

/// Initialize the logger with the specified configuration.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<()> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("cannot open log file {}", log_path.display()))?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<PreintegrationConfig> {
    match path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            PreintegrationConfig::from_file(path)
                .with_context(|| format!("cannot read configuration {}", path.display()))
        }
        None => Ok(PreintegrationConfig::default()),
    }
}

fn to_triple(values: &[f64], name: &str) -> Result<[f64; 3]> {
    match values {
        [x, y, z] => Ok([*x, *y, *z]),
        _ => bail!("--{name} takes exactly three comma-separated values"),
    }
}

fn simulate(config: &PreintegrationConfig, args: &SimulateArgs) -> Result<()> {
    let params = config.to_params()?;
    let scenario = ScenarioConfig {
        kind: args.scenario,
        duration_s: args.duration,
        sample_rate_hz: args.rate,
        seed: args.seed,
        omega: to_triple(&args.omega, "omega")?,
        velocity: to_triple(&args.velocity, "velocity")?,
        acceleration: to_triple(&args.acceleration, "acceleration")?,
    };
    info!(
        "Simulating {:?} scenario for {} s at {} Hz",
        scenario.kind, scenario.duration_s, scenario.sample_rate_hz
    );
    match scenario.seed {
        Some(seed) => info!("Measurement noise seed: {}", seed),
        None => info!("Noiseless measurements"),
    }
    let records = scenario.generate(&params, &config.initial_bias())?;
    write_imu_csv(&records, &args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    info!("Wrote {} records to {}", records.len(), args.output.display());
    Ok(())
}

fn integrate(config: &PreintegrationConfig, args: &IntegrateArgs, parallel: bool) -> Result<()> {
    let params = config.to_params()?;
    let bias = config.initial_bias();
    let interval = args.interval.unwrap_or(config.interval_s);
    info!("Preintegration parameters: {}", params);

    let records = read_imu_csv(&args.input)
        .with_context(|| format!("cannot read {}", args.input.display()))?;
    info!("Read {} records from {}", records.len(), args.input.display());
    let intervals = split_intervals(&records, interval)?;
    info!("Split into {} intervals of {} s", intervals.len(), interval);

    let summaries: Vec<PreintegrationSummary> = if parallel {
        info!("Running in parallel mode");
        intervals
            .par_iter()
            .map(|i| preintegrate_interval(&params, &bias, i))
            .collect::<Result<_, _>>()?
    } else {
        intervals
            .iter()
            .map(|i| preintegrate_interval(&params, &bias, i))
            .collect::<Result<_, _>>()?
    };
    write_summaries_json(&summaries, &args.output)
        .with_context(|| format!("cannot write {}", args.output.display()))?;
    info!("Summaries written to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;
    let config = load_config(cli.config.as_ref())?;
    match &cli.command {
        Command::Simulate(args) => simulate(&config, args),
        Command::Integrate(args) => integrate(&config, args, cli.parallel),
    }
}
