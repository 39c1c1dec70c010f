//! Linear algebra helpers for the fixed-size covariances carried by the engine.
//!
//! Public API:
//!     pub fn symmetrize(m) -> SMatrix
//!     pub fn is_symmetric(m, tol) -> bool
//!     pub fn is_positive_semi_definite(m, tol) -> bool
//!     pub fn cholesky_with_jitter(m, options) -> Option<(Cholesky, f64)>
//!     pub fn matrix_square_root(m) -> SMatrix
//!
//! Strategy for factoring a covariance:
//! 1) Symmetrize P ← 0.5 (P + Pᵀ)
//! 2) Cholesky
//! 3) Jittered Cholesky (geometric ramp, relative to the mean diagonal)
//! 4) Symmetric EVD with eigenvalue floor, only for square roots used in sampling
use nalgebra::linalg::{Cholesky, SymmetricEigen};
use nalgebra::{Const, DMatrix, SMatrix};

/// Jitter ramp used when a covariance is positive semi-definite but numerically singular
#[derive(Debug, Clone, Copy)]
pub struct JitterOptions {
    /// First jitter, as a fraction of the mean diagonal entry
    pub initial_jitter: f64,
    /// Largest jitter tried, same units as `initial_jitter`
    pub max_jitter: f64,
    pub max_tries: usize,
}
impl Default for JitterOptions {
    fn default() -> Self {
        Self {
            initial_jitter: 1e-12,
            max_jitter: 1e-6,
            max_tries: 6,
        }
    }
}

/// Symmetrize a matrix: P ← 0.5 (P + Pᵀ)
///
/// Removes the round-off asymmetry that accumulates in `F P Fᵀ` style propagation.
#[inline]
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    0.5 * (m + m.transpose())
}
/// True when `m` equals its transpose to within `tol` (absolute, element-wise)
pub fn is_symmetric<const N: usize>(m: &SMatrix<f64, N, N>, tol: f64) -> bool {
    (m - m.transpose()).abs().max() <= tol
}
/// True when `m` is symmetric and its smallest eigenvalue is above `-tol` times the largest
/// eigenvalue magnitude (or above `-tol` for an all-zero spectrum)
pub fn is_positive_semi_definite<const N: usize>(m: &SMatrix<f64, N, N>, tol: f64) -> bool {
    if m.iter().any(|x| !x.is_finite()) {
        return false;
    }
    let scale = m.abs().max().max(1.0);
    if !is_symmetric(m, tol * scale) {
        return false;
    }
    let eigenvalues = SymmetricEigen::new(to_dynamic(&symmetrize(m))).eigenvalues;
    let largest = eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
    eigenvalues.iter().all(|&l| l >= -tol * largest.max(1.0))
}
/// Cholesky factorization with a diagonal jitter ramp
///
/// Returns the factorization together with the jitter that was added to the diagonal (zero
/// when the plain factorization succeeded). Returns `None` when the matrix is not finite,
/// has a non-positive mean diagonal, or cannot be factored within the ramp.
pub fn cholesky_with_jitter<const N: usize>(
    m: &SMatrix<f64, N, N>,
    options: JitterOptions,
) -> Option<(Cholesky<f64, Const<N>>, f64)> {
    if m.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let p = symmetrize(m);
    if let Some(ch) = Cholesky::new(p).filter(has_positive_pivots) {
        return Some((ch, 0.0));
    }
    let scale = p.trace() / N as f64;
    if scale <= 0.0 {
        return None;
    }
    let mut jitter = options.initial_jitter;
    for _ in 0..options.max_tries {
        let mut pj = p;
        for i in 0..N {
            pj[(i, i)] += jitter * scale;
        }
        if let Some(ch) = Cholesky::new(pj).filter(has_positive_pivots) {
            return Some((ch, jitter * scale));
        }
        jitter *= 10.0;
        if jitter > options.max_jitter {
            break;
        }
    }
    None
}
/// Robust square root `S` with `m ≈ S Sᵀ`
///
/// Cholesky (lower triangular) when possible, otherwise the symmetric EVD square root with
/// negative eigenvalues floored at zero. Used to draw correlated samples from a covariance.
pub fn matrix_square_root<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    let p = symmetrize(m);
    if let Some(ch) = Cholesky::new(p).filter(has_positive_pivots) {
        return ch.l();
    }
    let se = SymmetricEigen::new(to_dynamic(&p));
    let sqrt_vals = se.eigenvalues.map(|l| l.max(0.0).sqrt());
    let s = &se.eigenvectors * DMatrix::from_diagonal(&sqrt_vals) * se.eigenvectors.transpose();
    SMatrix::<f64, N, N>::from_iterator(s.iter().cloned())
}
/// A zero pivot can slip through the factorization and poison the factor with infinities
fn has_positive_pivots<const N: usize>(ch: &Cholesky<f64, Const<N>>) -> bool {
    ch.l_dirty()
        .diagonal()
        .iter()
        .all(|d| d.is_finite() && *d > 0.0)
}
fn to_dynamic<const N: usize>(m: &SMatrix<f64, N, N>) -> DMatrix<f64> {
    DMatrix::from_iterator(N, N, m.iter().cloned())
}
