//! Cross-entropy method with a Gaussian Markov chain proposal.
//!
//! The proposal for the state path `X_0, ..., X_n` is parameterised by the
//! lower-triangular Cholesky factor `L` of its precision `P = L Lᵀ`. For a
//! first-order chain `L` is block lower-bidiagonal: diagonal blocks `D_t`
//! (lower triangular, positive diagonal) and sub-diagonal blocks `O_t` sitting
//! at block position `(t+1, t)`. Sampling, marginals and densities all work on
//! these blocks directly; the dense `(n+1)m x (n+1)m` matrices are never formed.

use isssm_core::{Error, IterationReport, Key, ObservationDistribution, Result, Termination};
use log::{debug, warn};
use nalgebra::{Cholesky, DMatrix, DVector};
use rayon::prelude::*;

use crate::config::CrossEntropyConfig;
use crate::importance::{ess_pct, laplace_importance_sampling, normalize_log_weights};
use crate::linalg::{LN_2PI, any_nan, flatten_matrices, flatten_vectors, max_relative_change, standard_normal};
use crate::mode::ModeEstimate;
use crate::model::{Pgssm, validate_series};

/// Block components of the precision Cholesky factor of a Gaussian Markov chain.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkovProcessCholesky {
    /// Diagonal blocks `D_0, ..., D_n` (m x m, lower triangular).
    pub full_diag: Vec<DMatrix<f64>>,
    /// Sub-diagonal blocks `O_0, ..., O_{n-1}` (m x m), `O_t` couples `X_{t+1}` to `X_t`.
    pub off_diag: Vec<DMatrix<f64>>,
}

impl MarkovProcessCholesky {
    /// Create a factor, checking shapes, triangularity and a positive diagonal.
    pub fn new(full_diag: Vec<DMatrix<f64>>, off_diag: Vec<DMatrix<f64>>) -> Result<Self> {
        let Some(first) = full_diag.first() else {
            return Err(Error::Validation("at least one diagonal block is required".to_string()));
        };
        let m = first.nrows();
        if full_diag.iter().any(|d| d.nrows() != m || d.ncols() != m) {
            return Err(Error::Validation(format!("diagonal blocks must all be {}x{}", m, m)));
        }
        if off_diag.len() + 1 != full_diag.len() || off_diag.iter().any(|o| o.nrows() != m || o.ncols() != m) {
            return Err(Error::Validation(format!(
                "expected {} off-diagonal blocks of shape {}x{}, got {}",
                full_diag.len() - 1,
                m,
                m,
                off_diag.len()
            )));
        }
        for (t, d) in full_diag.iter().enumerate() {
            for i in 0..m {
                let pivot = d[(i, i)];
                if !(pivot.is_finite() && pivot > 0.0) {
                    return Err(Error::Validation(format!(
                        "diagonal block {} has a non-positive diagonal entry",
                        t
                    )));
                }
                if (i + 1..m).any(|j| d[(i, j)] != 0.0) {
                    return Err(Error::Validation(format!("diagonal block {} is not lower triangular", t)));
                }
            }
        }
        if off_diag.iter().any(|o| o.iter().any(|v| !v.is_finite())) {
            return Err(Error::Validation("off-diagonal blocks must be finite".to_string()));
        }
        Ok(Self { full_diag, off_diag })
    }

    /// Number of time steps `n + 1`.
    pub fn n_steps(&self) -> usize {
        self.full_diag.len()
    }

    /// State dimension `m`.
    pub fn state_dim(&self) -> usize {
        self.full_diag.first().map_or(0, |d| d.nrows())
    }

    fn check_path(&self, x: &[DVector<f64>], what: &str) -> Result<()> {
        let m = self.state_dim();
        if x.len() != self.n_steps() || x.iter().any(|xt| xt.len() != m) {
            return Err(Error::Validation(format!(
                "{} must have {} steps of length {}, got {} steps",
                what,
                self.n_steps(),
                m,
                x.len()
            )));
        }
        Ok(())
    }

    /// `Lᵀ c`: block `t` is `D_tᵀ c_t + O_tᵀ c_{t+1}`.
    fn apply_transpose(&self, c: &[DVector<f64>]) -> Vec<DVector<f64>> {
        let np1 = self.n_steps();
        (0..np1)
            .map(|t| {
                let mut w = self.full_diag[t].tr_mul(&c[t]);
                if t + 1 < np1 {
                    w += self.off_diag[t].tr_mul(&c[t + 1]);
                }
                w
            })
            .collect()
    }

    /// Solve `Lᵀ x = z` backwards in time.
    fn solve_transpose(&self, z: &[DVector<f64>]) -> Result<Vec<DVector<f64>>> {
        let np1 = self.n_steps();
        let mut x = vec![DVector::zeros(self.state_dim()); np1];
        for t in (0..np1).rev() {
            let rhs = if t + 1 < np1 { &z[t] - self.off_diag[t].tr_mul(&x[t + 1]) } else { z[t].clone() };
            x[t] = self.full_diag[t]
                .tr_solve_lower_triangular(&rhs)
                .ok_or_else(|| Error::Computation(format!("diagonal block {} is singular", t)))?;
        }
        Ok(x)
    }

    /// Draw `n` paths from `N(mean, P⁻¹)`.
    pub fn simulate(&self, mean: &[DVector<f64>], n: usize, key: Key) -> Result<Vec<Vec<DVector<f64>>>> {
        self.check_path(mean, "mean")?;
        let (np1, m) = (self.n_steps(), self.state_dim());
        key.split_n(n)
            .into_par_iter()
            .map(|k| -> Result<Vec<DVector<f64>>> {
                let mut rng = k.rng();
                let z: Vec<DVector<f64>> = (0..np1).map(|_| standard_normal(m, &mut rng)).collect();
                let x = self.solve_transpose(&z)?;
                Ok(x.into_iter().zip(mean).map(|(xt, mt)| xt + mt).collect())
            })
            .collect()
    }

    /// Gaussian log-density of the path `x` under `N(mean, P⁻¹)`.
    ///
    /// `log|P| = 2 Σ log diag(D_t)` and the quadratic form is `‖Lᵀ(x - mean)‖²`.
    pub fn log_prob(&self, x: &[DVector<f64>], mean: &[DVector<f64>]) -> Result<f64> {
        self.check_path(x, "x")?;
        self.check_path(mean, "mean")?;
        let centered: Vec<DVector<f64>> = x.iter().zip(mean).map(|(xt, mt)| xt - mt).collect();
        let quad: f64 = self.apply_transpose(&centered).iter().map(|w| w.norm_squared()).sum();
        let half_logdet: f64 =
            self.full_diag.iter().map(|d| d.diagonal().iter().map(|v| v.ln()).sum::<f64>()).sum();
        let dim = (self.n_steps() * self.state_dim()) as f64;
        Ok(-0.5 * dim * LN_2PI + half_logdet - 0.5 * quad)
    }

    /// Marginal covariances `Cov(X_t)` by a backward recursion over the blocks.
    ///
    /// `Σ_n = (D_n D_nᵀ)⁻¹` and `Σ_t = F_t Σ_{t+1} F_tᵀ + (D_t D_tᵀ)⁻¹` with
    /// `F_t = -D_t⁻ᵀ O_tᵀ`.
    pub fn marginal_covariances(&self) -> Result<Vec<DMatrix<f64>>> {
        let (np1, m) = (self.n_steps(), self.state_dim());
        if np1 == 0 {
            return Ok(Vec::new());
        }
        let eye = DMatrix::<f64>::identity(m, m);
        let inv_diag = self
            .full_diag
            .iter()
            .enumerate()
            .map(|(t, d)| {
                d.solve_lower_triangular(&eye)
                    .ok_or_else(|| Error::Computation(format!("diagonal block {} is singular", t)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut sigma = vec![DMatrix::zeros(m, m); np1];
        sigma[np1 - 1] = inv_diag[np1 - 1].tr_mul(&inv_diag[np1 - 1]);
        for t in (0..np1 - 1).rev() {
            let f = -inv_diag[t].tr_mul(&self.off_diag[t].transpose());
            let next = &f * &sigma[t + 1] * f.transpose() + inv_diag[t].tr_mul(&inv_diag[t]);
            sigma[t] = next;
        }
        Ok(sigma)
    }

    /// Marginal means and variances of every `X_t`.
    pub fn marginals(&self, mean: &[DVector<f64>]) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>)> {
        self.check_path(mean, "mean")?;
        let variances = self.marginal_covariances()?.iter().map(|s| s.diagonal()).collect();
        Ok((mean.to_vec(), variances))
    }

    /// The dense factor `L`.
    pub fn to_dense_factor(&self) -> DMatrix<f64> {
        let (np1, m) = (self.n_steps(), self.state_dim());
        let mut l = DMatrix::zeros(np1 * m, np1 * m);
        for t in 0..np1 {
            l.view_mut((t * m, t * m), (m, m)).copy_from(&self.full_diag[t]);
            if t + 1 < np1 {
                l.view_mut(((t + 1) * m, t * m), (m, m)).copy_from(&self.off_diag[t]);
            }
        }
        l
    }

    /// The dense precision `L Lᵀ`.
    pub fn to_dense_precision(&self) -> DMatrix<f64> {
        let l = self.to_dense_factor();
        &l * l.transpose()
    }

    fn flattened(&self) -> Vec<f64> {
        let mut out = flatten_matrices(&self.full_diag);
        out.extend(flatten_matrices(&self.off_diag));
        out
    }
}

/// Weighted covariance `Σ_i w_i (x_i - x̄)(x_i - x̄)ᵀ` for normalised weights.
fn weighted_covariance(xs: &[DVector<f64>], w: &[f64]) -> DMatrix<f64> {
    let dim = xs[0].len();
    let mean = xs.iter().zip(w).fold(DVector::zeros(dim), |acc, (x, wi)| acc + *wi * x);
    xs.iter().zip(w).fold(DMatrix::zeros(dim, dim), |acc, (x, wi)| {
        let c = x - &mean;
        acc + *wi * &c * c.transpose()
    })
}

/// First `k` columns of the lower Cholesky factor of `cov⁻¹`.
///
/// Column `i` is `cov_{≥i}⁻¹ e_i / sqrt(e_iᵀ cov_{≥i}⁻¹ e_i)`, where `cov_{≥i}`
/// drops coordinates `< i`. Dropped rows and columns are overwritten with unit
/// vectors instead of shrinking the matrix. A column whose pivot is not
/// positive comes back as NaN.
fn precision_root_columns(cov: &DMatrix<f64>, k: usize) -> DMatrix<f64> {
    let dim = cov.nrows();
    let mut work = cov.clone();
    let mut l = DMatrix::zeros(dim, k);
    for i in 0..k {
        let e = DVector::from_fn(dim, |r, _| if r == i { 1.0 } else { 0.0 });
        let solved = work.clone().lu().solve(&e);

        work.row_mut(i).fill(0.0);
        work.column_mut(i).fill(0.0);
        work[(i, i)] = 1.0;

        match solved {
            Some(v) if v[i] > 0.0 && v.iter().all(|x| x.is_finite()) => {
                let mut col = &v / v[i].sqrt();
                col.rows_mut(0, i).fill(0.0);
                l.set_column(i, &col);
            }
            _ => l.column_mut(i).fill(f64::NAN),
        }
    }
    l
}

fn sample_shape(samples: &[Vec<DVector<f64>>]) -> Result<(usize, usize)> {
    let Some(first) = samples.first() else {
        return Err(Error::Validation("at least one sample path is required".to_string()));
    };
    let np1 = first.len();
    let m = first.first().map_or(0, |x| x.len());
    if np1 == 0 || m == 0 {
        return Err(Error::Validation("sample paths must be non-empty".to_string()));
    }
    if samples.iter().any(|s| s.len() != np1 || s.iter().any(|x| x.len() != m)) {
        return Err(Error::Validation(format!("all sample paths must have {} steps of length {}", np1, m)));
    }
    Ok((np1, m))
}

/// Fit the Markov precision factor to weighted samples of the path.
///
/// `weights` need not be normalised. Each block only needs the weighted
/// covariance of `(X_t, X_{t+1})`, which is what makes the fit exact for
/// Gaussian Markov chains. Blocks are fitted in parallel.
pub fn cholesky_components(samples: &[Vec<DVector<f64>>], weights: &[f64]) -> Result<MarkovProcessCholesky> {
    let (np1, m) = sample_shape(samples)?;
    if weights.len() != samples.len() {
        return Err(Error::Validation(format!(
            "{} weights given for {} samples",
            weights.len(),
            samples.len()
        )));
    }
    let total: f64 = weights.iter().sum();
    let w: Vec<f64> = weights.iter().map(|wi| wi / total).collect();

    let blocks: Vec<(DMatrix<f64>, Option<DMatrix<f64>>)> = (0..np1)
        .into_par_iter()
        .map(|t| {
            if t + 1 < np1 {
                let pairs: Vec<DVector<f64>> = samples
                    .iter()
                    .map(|s| DVector::from_iterator(2 * m, s[t].iter().chain(s[t + 1].iter()).copied()))
                    .collect();
                let l = precision_root_columns(&weighted_covariance(&pairs, &w), m);
                (l.rows(0, m).into_owned(), Some(l.rows(m, m).into_owned()))
            } else {
                let last: Vec<DVector<f64>> = samples.iter().map(|s| s[t].clone()).collect();
                (precision_root_columns(&weighted_covariance(&last, &w), m), None)
            }
        })
        .collect();

    let mut full_diag = Vec::with_capacity(np1);
    let mut off_diag = Vec::with_capacity(np1 - 1);
    for (d, o) in blocks {
        full_diag.push(d);
        off_diag.extend(o);
    }
    Ok(MarkovProcessCholesky { full_diag, off_diag })
}

/// Weighted mean path `Σ_i w_i x_i` (weights need not be normalised).
pub fn weighted_mean(samples: &[Vec<DVector<f64>>], weights: &[f64]) -> Result<Vec<DVector<f64>>> {
    let (np1, m) = sample_shape(samples)?;
    if weights.len() != samples.len() {
        return Err(Error::Validation(format!(
            "{} weights given for {} samples",
            weights.len(),
            samples.len()
        )));
    }
    let total: f64 = weights.iter().sum();
    let mut mean = vec![DVector::zeros(m); np1];
    for (s, wi) in samples.iter().zip(weights) {
        for (mt, xt) in mean.iter_mut().zip(s) {
            *mt += (wi / total) * xt;
        }
    }
    Ok(mean)
}

/// Importance log-weight `log p(x, y) - log g(x)` of one path.
pub fn ce_log_weights<D: ObservationDistribution>(
    x: &[DVector<f64>],
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    proposal: &MarkovProcessCholesky,
    mean: &[DVector<f64>],
) -> Result<f64> {
    Ok(model.log_prob(x, y)? - proposal.log_prob(x, mean)?)
}

/// Output of the cross-entropy method.
#[derive(Debug, Clone)]
pub struct CrossEntropyResult {
    /// Fitted precision factor.
    pub proposal: MarkovProcessCholesky,
    /// Fitted mean path.
    pub mean: Vec<DVector<f64>>,
    /// Final batch drawn from the fitted proposal.
    pub samples: Vec<Vec<DVector<f64>>>,
    /// Unnormalised log-weights of `samples`.
    pub log_weights: Vec<f64>,
    /// Iteration count and stop reason.
    pub report: IterationReport,
}

/// The joint density of the proposal is Lebesgue; it can only be compared
/// against a target whose state transitions are non-degenerate.
fn check_nondegenerate_transitions<D: ObservationDistribution>(model: &Pgssm<D>) -> Result<()> {
    let state = model.state();
    if Cholesky::new(model.sigma0.clone()).is_none() {
        return Err(Error::Validation(
            "cross-entropy method needs a positive definite initial covariance".to_string(),
        ));
    }
    for t in 0..model.n_steps() - 1 {
        if Cholesky::new(state.innovation_cov(t)).is_none() {
            return Err(Error::Validation(format!(
                "cross-entropy method needs positive definite innovation covariances (step {})",
                t
            )));
        }
    }
    Ok(())
}

fn draw_and_weigh<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    proposal: &MarkovProcessCholesky,
    mean: &[DVector<f64>],
    n: usize,
    key: Key,
) -> Result<(Vec<Vec<DVector<f64>>>, Vec<f64>)> {
    let samples = proposal.simulate(mean, n, key)?;
    let log_weights = samples
        .par_iter()
        .map(|x| ce_log_weights(x, y, model, proposal, mean))
        .collect::<Result<Vec<_>>>()?;
    Ok((samples, log_weights))
}

fn refit(samples: &[Vec<DVector<f64>>], weights: &[f64]) -> Result<(MarkovProcessCholesky, Vec<DVector<f64>>)> {
    Ok((cholesky_components(samples, weights)?, weighted_mean(samples, weights)?))
}

/// Refine a Markov-chain proposal for `p(x | y)` by the cross-entropy method.
///
/// The starting proposal is fitted to `initial_samples` weighted by
/// `initial_log_weights`. Each iteration simulates `config.n_samples` paths,
/// weights them against the model and refits factor and mean. The first
/// refit is always performed before any convergence check. The loop stops
/// when the relative change of all blocks and the mean is below
/// `config.eps`, when any of them becomes NaN, or after `config.n_iter`
/// iterations; a final batch is then drawn from the fitted proposal.
pub fn ce_cholesky_precision<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    initial_samples: &[Vec<DVector<f64>>],
    initial_log_weights: &[f64],
    config: &CrossEntropyConfig,
    key: Key,
) -> Result<CrossEntropyResult> {
    config.validate()?;
    validate_series(y, model.n_steps(), model.obs_dim(), "y")?;
    check_nondegenerate_transitions(model)?;
    let (np1, m) = sample_shape(initial_samples)?;
    if np1 != model.n_steps() || m != model.state_dim() {
        return Err(Error::Validation(format!(
            "initial samples have {} steps of dimension {}, model has {} of dimension {}",
            np1,
            m,
            model.n_steps(),
            model.state_dim()
        )));
    }

    let (iter_key, final_key) = key.split();
    let (mut proposal, mut mean) = refit(initial_samples, &normalize_log_weights(initial_log_weights))?;
    let mut iterations = 0usize;

    let termination = loop {
        let (samples, log_weights) =
            draw_and_weigh(y, model, &proposal, &mean, config.n_samples, iter_key.fold_in(iterations as u64))?;
        let (new_proposal, new_mean) = refit(&samples, &normalize_log_weights(&log_weights))?;
        iterations += 1;

        let mut old_values = proposal.flattened();
        old_values.extend(flatten_vectors(&mean));
        let mut values = new_proposal.flattened();
        values.extend(flatten_vectors(&new_mean));
        let change = max_relative_change(&values, &old_values);
        debug!(
            "cross-entropy iteration {}: max relative change {:.3e}, ESS {:.1}%",
            iterations,
            change,
            ess_pct(&log_weights)
        );

        proposal = new_proposal;
        mean = new_mean;
        if let Some(reason) =
            Termination::from_flags(any_nan(&values), change < config.eps, iterations >= config.n_iter)
        {
            break reason;
        }
    };

    match termination {
        Termination::NonFinite => warn!("cross-entropy method stopped on NaN after {} iterations", iterations),
        Termination::IterationLimit => debug!("cross-entropy method hit the iteration limit ({})", config.n_iter),
        Termination::Converged => debug!("cross-entropy method converged after {} iterations", iterations),
    }

    let (samples, log_weights) = draw_and_weigh(y, model, &proposal, &mean, config.n_samples, final_key)?;
    Ok(CrossEntropyResult { proposal, mean, samples, log_weights, report: IterationReport { iterations, termination } })
}

/// Cross-entropy method started from the Laplace approximation at the mode.
///
/// The initial samples are importance samples from the Gaussian pseudo-model
/// `(mode.z, mode.omega)`.
pub fn ce_from_mode<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    mode: &ModeEstimate,
    config: &CrossEntropyConfig,
    key: Key,
) -> Result<CrossEntropyResult> {
    config.validate()?;
    let (la_key, ce_key) = key.split();
    let initial = laplace_importance_sampling(y, model, &mode.z, &mode.omega, config.n_samples, la_key)?;
    debug!("laplace importance sampling: ESS {:.1}%", ess_pct(&initial.log_weights));
    ce_cholesky_precision(y, model, &initial.samples, &initial.log_weights, config, ce_key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lower(m: usize, vals: &[f64]) -> DMatrix<f64> {
        DMatrix::from_row_slice(m, m, vals)
    }

    fn chain() -> MarkovProcessCholesky {
        MarkovProcessCholesky::new(
            vec![
                lower(2, &[1.5, 0.0, 0.3, 1.1]),
                lower(2, &[0.9, 0.0, -0.2, 1.3]),
                lower(2, &[2.0, 0.0, 0.4, 0.7]),
            ],
            vec![lower(2, &[-0.5, 0.1, 0.2, -0.3]), lower(2, &[0.3, 0.0, -0.6, 0.2])],
        )
        .unwrap()
    }

    fn mean() -> Vec<DVector<f64>> {
        vec![
            DVector::from_row_slice(&[0.5, -1.0]),
            DVector::from_row_slice(&[1.0, 0.0]),
            DVector::from_row_slice(&[-0.3, 2.0]),
        ]
    }

    #[test]
    fn test_new_rejects_bad_blocks() {
        let ok = chain();
        assert!(MarkovProcessCholesky::new(ok.full_diag.clone(), vec![]).is_err());
        let mut upper = ok.full_diag.clone();
        upper[1][(0, 1)] = 0.5;
        assert!(MarkovProcessCholesky::new(upper, ok.off_diag.clone()).is_err());
        let mut negative = ok.full_diag.clone();
        negative[0][(1, 1)] = -1.0;
        assert!(MarkovProcessCholesky::new(negative, ok.off_diag).is_err());
    }

    #[test]
    fn test_log_prob_matches_dense() {
        let c = chain();
        let mu = mean();
        let x = vec![
            DVector::from_row_slice(&[0.1, 0.2]),
            DVector::from_row_slice(&[-0.4, 0.9]),
            DVector::from_row_slice(&[1.0, 1.0]),
        ];
        let precision = c.to_dense_precision();
        let cov = precision.clone().try_inverse().unwrap();
        let dx = DVector::from_iterator(6, x.iter().zip(&mu).flat_map(|(a, b)| (a - b).iter().copied().collect::<Vec<_>>()));
        let expected = -3.0 * LN_2PI - 0.5 * cov.determinant().ln() - 0.5 * (dx.transpose() * &precision * &dx)[(0, 0)];
        assert_relative_eq!(c.log_prob(&x, &mu).unwrap(), expected, epsilon = 1e-10);
    }

    #[test]
    fn test_marginal_covariances_match_dense_inverse() {
        let c = chain();
        let cov = c.to_dense_precision().try_inverse().unwrap();
        let covs = c.marginal_covariances().unwrap();
        for t in 0..3 {
            let block = cov.view((2 * t, 2 * t), (2, 2)).into_owned();
            assert_relative_eq!(covs[t], block, epsilon = 1e-10);
        }
        let (mu, var) = c.marginals(&mean()).unwrap();
        assert_eq!(mu, mean());
        assert_relative_eq!(var[1][0], cov[(2, 2)], epsilon = 1e-10);
    }

    #[test]
    fn test_precision_root_columns_is_cholesky_of_inverse() {
        let cov = DMatrix::from_row_slice(3, 3, &[2.0, 0.5, 0.1, 0.5, 1.5, 0.3, 0.1, 0.3, 1.0]);
        let expected = cov.clone().try_inverse().unwrap().cholesky().unwrap().l();
        let l = precision_root_columns(&cov, 3);
        assert_relative_eq!(l, expected, epsilon = 1e-10);
        let first_two = precision_root_columns(&cov, 2);
        assert_relative_eq!(first_two, expected.columns(0, 2).into_owned(), epsilon = 1e-10);
    }

    #[test]
    fn test_singular_covariance_gives_nan_column() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let l = precision_root_columns(&cov, 2);
        assert!(l.iter().any(|v| v.is_nan()));
    }

    #[test]
    fn test_simulate_is_reproducible_and_centered() {
        let c = chain();
        let mu = mean();
        let a = c.simulate(&mu, 8, Key::new(4)).unwrap();
        assert_eq!(a, c.simulate(&mu, 8, Key::new(4)).unwrap());
        assert_ne!(a, c.simulate(&mu, 8, Key::new(5)).unwrap());

        let n = 20_000;
        let draws = c.simulate(&mu, n, Key::new(9)).unwrap();
        let var = c.marginal_covariances().unwrap();
        for t in 0..3 {
            for i in 0..2 {
                let avg = draws.iter().map(|p| p[t][i]).sum::<f64>() / n as f64;
                let se = (var[t][(i, i)] / n as f64).sqrt();
                assert!((avg - mu[t][i]).abs() < 4.0 * se);
            }
        }
    }

    #[test]
    fn test_weighted_mean_normalises() {
        let samples = vec![vec![DVector::from_element(1, 1.0)], vec![DVector::from_element(1, 4.0)]];
        let m = weighted_mean(&samples, &[2.0, 1.0]).unwrap();
        assert_relative_eq!(m[0][0], 2.0, epsilon = 1e-12);
        assert!(weighted_mean(&samples, &[1.0]).is_err());
        assert!(cholesky_components(&[], &[]).is_err());
    }
}
