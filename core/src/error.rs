//! Error type shared by the preintegration engine, the factor and the record helpers.
//!
//! The numerical core itself is total over its documented input domain. Errors only
//! arise at the boundary: malformed samples, malformed noise covariances, noise models
//! that cannot be factored, and I/O on IMU record files.
use thiserror::Error;

/// Errors raised at the boundary of the preintegration pipeline
#[derive(Debug, Error)]
pub enum PreintegrationError {
    /// A sample or request violated the caller contract (non-positive or non-finite
    /// time step, non-finite readings, out-of-order timestamps, ...)
    #[error("invalid preintegration input: {0}")]
    InvalidInput(String),
    /// A configured noise covariance is not a symmetric positive semi-definite matrix
    #[error("invalid noise covariance: {0}")]
    InvalidCovariance(String),
    /// A Gaussian noise model could not be built from a covariance
    #[error("covariance is not positive definite: {0}")]
    NotPositiveDefinite(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, PreintegrationError>;
