//! Linear algebra helpers shared by the filters, smoothers and samplers.
//!
//! Covariance matrices in state space models are routinely singular (rank-deficient
//! innovations, exactly observed signals, dropped observations), so nothing here
//! assumes positive definiteness: square roots go through a symmetric
//! eigendecomposition followed by a sign-fixed QR, and inverses are pseudo-inverses.

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use isssm_core::{Error, Result};
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use rayon::prelude::*;

/// Natural log of `2*pi`.
pub(crate) const LN_2PI: f64 = 1.837_877_066_409_345_3;

const EIGEN_MAX_ITER: usize = 10_000;

/// `(P + Pᵀ) / 2`.
#[inline]
pub fn symmetrize(p: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (p + p.transpose())
}

fn check_square_finite(a: &DMatrix<f64>, what: &str) -> Result<()> {
    if a.nrows() != a.ncols() {
        return Err(Error::Validation(format!(
            "{} must be square, got {}x{}",
            what,
            a.nrows(),
            a.ncols()
        )));
    }
    if a.iter().any(|v| !v.is_finite()) {
        return Err(Error::Computation(format!("{} has non-finite entries", what)));
    }
    Ok(())
}

fn symmetric_eigen(a: &DMatrix<f64>, what: &str) -> Result<SymmetricEigen<f64, nalgebra::Dyn>> {
    check_square_finite(a, what)?;
    SymmetricEigen::try_new(symmetrize(a), f64::EPSILON, EIGEN_MAX_ITER)
        .ok_or_else(|| Error::Computation(format!("eigendecomposition of {} did not converge", what)))
}

fn eigen_tolerance(eigenvalues: &DVector<f64>) -> f64 {
    let max_abs = eigenvalues.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
    eigenvalues.len().max(1) as f64 * f64::EPSILON * max_abs
}

/// Flip rows of an upper-triangular factor so that its diagonal is non-negative.
///
/// `RᵀR` is unchanged. Rows with an exactly zero diagonal keep their sign.
pub fn with_nonnegative_diagonal(mut r: DMatrix<f64>) -> DMatrix<f64> {
    let k = r.nrows().min(r.ncols());
    for i in 0..k {
        if r[(i, i)] < 0.0 {
            for j in 0..r.ncols() {
                r[(i, j)] = -r[(i, j)];
            }
        }
    }
    r
}

/// Lower-triangular `L` with `L Lᵀ = cov` for a symmetric PSD, possibly singular, `cov`.
///
/// `cov = V Λ Vᵀ`; the rows of `M = Λ^{1/2} Vᵀ` satisfy `MᵀM = cov`, and the `R`
/// factor of `M = QR` (rows sign-fixed) gives `L = Rᵀ`. Slightly negative
/// eigenvalues from round-off are clipped to zero.
pub fn degenerate_cholesky(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = cov.nrows();
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let eig = symmetric_eigen(cov, "covariance")?;
    let mut m = eig.eigenvectors.transpose();
    for i in 0..n {
        let s = eig.eigenvalues[i].max(0.0).sqrt();
        for j in 0..n {
            m[(i, j)] *= s;
        }
    }
    let r = with_nonnegative_diagonal(m.qr().r());
    Ok(r.transpose())
}

/// Moore–Penrose pseudo-inverse of a symmetric matrix.
///
/// Eigenvalues with `|λ| <= n·ε·max|λ|` are treated as zero.
pub fn pinv_symmetric(a: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = a.nrows();
    if n == 0 {
        return Ok(DMatrix::zeros(0, 0));
    }
    let eig = symmetric_eigen(a, "symmetric matrix")?;
    let tol = eigen_tolerance(&eig.eigenvalues);
    let inv_vals = eig.eigenvalues.map(|l| if l.abs() > tol { 1.0 / l } else { 0.0 });
    let v = &eig.eigenvectors;
    Ok(v * DMatrix::from_diagonal(&inv_vals) * v.transpose())
}

/// Gaussian log-density `log N(x; mean, cov)` on the support of `cov`.
///
/// Singular covariances are handled through the pseudo-determinant and the
/// pseudo-inverse, i.e. the density of the projection of `x - mean` onto the
/// range of `cov` with respect to Lebesgue measure on that range.
pub fn mvn_log_density(x: &DVector<f64>, mean: &DVector<f64>, cov: &DMatrix<f64>) -> Result<f64> {
    let n = x.len();
    if mean.len() != n || cov.nrows() != n {
        return Err(Error::Validation(format!(
            "mvn_log_density: x has length {}, mean {}, cov {}x{}",
            n,
            mean.len(),
            cov.nrows(),
            cov.ncols()
        )));
    }
    if n == 0 {
        return Ok(0.0);
    }
    let eig = symmetric_eigen(cov, "covariance")?;
    let tol = eigen_tolerance(&eig.eigenvalues);
    let proj = eig.eigenvectors.transpose() * (x - mean);

    let mut rank = 0usize;
    let mut logdet = 0.0;
    let mut quad = 0.0;
    for (i, &l) in eig.eigenvalues.iter().enumerate() {
        if l > tol {
            rank += 1;
            logdet += l.ln();
            quad += proj[i] * proj[i] / l;
        }
    }
    Ok(-0.5 * (rank as f64 * LN_2PI + logdet + quad))
}

/// Sup-norm of the relative change `|new - old| / |old|`.
///
/// Entries that did not change at all (including exact zeros in both) are skipped,
/// so structurally zero entries never produce `0/0`.
pub fn max_relative_change(new: &[f64], old: &[f64]) -> f64 {
    new.iter()
        .zip(old)
        .filter(|(n, o)| n != o)
        .map(|(n, o)| ((n - o) / o).abs())
        .fold(0.0, |acc, r| if r.is_nan() || r > acc { r } else { acc })
}

/// Whether an iteration should stop: relative change below `eps`, or any NaN in `new`.
pub fn converged(new: &[f64], old: &[f64], eps: f64) -> bool {
    any_nan(new) || max_relative_change(new, old) < eps
}

/// `true` if any entry is NaN.
#[inline]
pub fn any_nan(xs: &[f64]) -> bool {
    xs.iter().any(|v| v.is_nan())
}

/// Concatenate a time series of matrices into a flat vector (column-major per entry).
pub fn flatten_matrices(ms: &[DMatrix<f64>]) -> Vec<f64> {
    ms.iter().flat_map(|m| m.iter().copied()).collect()
}

/// Concatenate a time series of vectors into a flat vector.
pub fn flatten_vectors(vs: &[DVector<f64>]) -> Vec<f64> {
    vs.iter().flat_map(|v| v.iter().copied()).collect()
}

/// `out[t] = mats[t] * xs[t]`.
pub fn mm_time(mats: &[DMatrix<f64>], xs: &[DVector<f64>]) -> Vec<DVector<f64>> {
    debug_assert_eq!(mats.len(), xs.len());
    mats.iter().zip(xs).map(|(m, x)| m * x).collect()
}

/// `out[i] = mat * xs[i]` over a sample axis.
pub fn mm_sim(mat: &DMatrix<f64>, xs: &[DVector<f64>]) -> Vec<DVector<f64>> {
    xs.iter().map(|x| mat * x).collect()
}

/// `out[i][t] = mats[t] * paths[i][t]` over sample and time axes.
pub fn mm_time_sim(mats: &[DMatrix<f64>], paths: &[Vec<DVector<f64>>]) -> Vec<Vec<DVector<f64>>> {
    paths.par_iter().map(|path| mm_time(mats, path)).collect()
}

/// Vector of `n` iid standard normal draws.
pub fn standard_normal(n: usize, rng: &mut StdRng) -> DVector<f64> {
    DVector::from_fn(n, |_, _| StandardNormal.sample(rng))
}
