//! Gaussian noise model for whitening factor residuals
use log::warn;
use nalgebra::{SMatrix, SVector};

use crate::error::{PreintegrationError, Result};
use crate::linalg::{JitterOptions, cholesky_with_jitter};

/// Zero-mean Gaussian noise described by a full covariance
///
/// Stores the covariance and the upper-triangular square-root information matrix
/// `R = L⁻¹` where `Σ = L Lᵀ`, so that `‖R e‖²` is the squared Mahalanobis distance of `e`.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianNoiseModel<const N: usize = 9> {
    covariance: SMatrix<f64, N, N>,
    sqrt_information: SMatrix<f64, N, N>,
}
impl<const N: usize> GaussianNoiseModel<N> {
    /// Build a noise model from a covariance
    ///
    /// A numerically singular but positive semi-definite covariance is factored after adding a
    /// small diagonal jitter (a warning is logged). A covariance that still cannot be factored,
    /// such as the all-zero covariance of noiseless preintegration, is an error.
    pub fn from_covariance(covariance: SMatrix<f64, N, N>) -> Result<Self> {
        let (cholesky, jitter) = cholesky_with_jitter(&covariance, JitterOptions::default())
            .ok_or_else(|| {
                PreintegrationError::NotPositiveDefinite(format!(
                    "cannot factor {N}x{N} covariance with trace {:.3e}",
                    covariance.trace()
                ))
            })?;
        if jitter > 0.0 {
            warn!("covariance factored with diagonal jitter {jitter:.3e}");
        }
        let sqrt_information = cholesky
            .l()
            .solve_lower_triangular(&SMatrix::<f64, N, N>::identity())
            .ok_or_else(|| {
                PreintegrationError::NotPositiveDefinite(
                    "singular Cholesky factor".to_string(),
                )
            })?;
        Ok(GaussianNoiseModel {
            covariance,
            sqrt_information,
        })
    }
    /// Isotropic noise with standard deviation `sigma` on every component
    pub fn isotropic(sigma: f64) -> Result<Self> {
        Self::from_covariance(SMatrix::<f64, N, N>::identity() * sigma * sigma)
    }
    pub fn covariance(&self) -> &SMatrix<f64, N, N> {
        &self.covariance
    }
    /// Square-root information matrix `R` with `Rᵀ R = Σ⁻¹`
    pub fn sqrt_information(&self) -> &SMatrix<f64, N, N> {
        &self.sqrt_information
    }
    /// Information matrix `Σ⁻¹`
    pub fn information(&self) -> SMatrix<f64, N, N> {
        self.sqrt_information.transpose() * self.sqrt_information
    }
    /// Whitened residual `R e`
    pub fn whiten(&self, error: &SVector<f64, N>) -> SVector<f64, N> {
        self.sqrt_information * error
    }
    /// Whitened Jacobian `R H`
    pub fn whiten_jacobian<const C: usize>(&self, jacobian: &SMatrix<f64, N, C>) -> SMatrix<f64, N, C> {
        self.sqrt_information * jacobian
    }
    /// Squared Mahalanobis distance `eᵀ Σ⁻¹ e`
    pub fn squared_mahalanobis_distance(&self, error: &SVector<f64, N>) -> f64 {
        self.whiten(error).norm_squared()
    }
}
