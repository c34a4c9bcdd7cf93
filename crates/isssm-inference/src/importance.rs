//! Importance sampling against a Gaussian (Laplace) approximation, and
//! weighted Monte Carlo summaries of the resulting draws.

use isssm_core::{Error, Key, ObservationDistribution, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::ffbs::ffbs;
use crate::linalg::flatten_vectors;
use crate::mode::ModeEstimate;
use crate::model::{Pgssm, validate_series};
use crate::simulate::sample_observations;

/// Self-normalised weights from log-weights (max-shifted for stability).
///
/// All-`-inf` or NaN input yields NaN weights.
pub fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let unnorm: Vec<f64> = log_weights.iter().map(|lw| (lw - max).exp()).collect();
    let total: f64 = unnorm.iter().sum();
    unnorm.into_iter().map(|w| w / total).collect()
}

/// Effective sample size `1 / Σ w_i²` of normalised weights.
pub fn ess(weights: &[f64]) -> f64 {
    1.0 / weights.iter().map(|w| w * w).sum::<f64>()
}

/// Effective sample size of log-weights.
pub fn ess_log_weights(log_weights: &[f64]) -> f64 {
    ess(&normalize_log_weights(log_weights))
}

/// Effective sample size as a percentage of the number of draws.
pub fn ess_pct(log_weights: &[f64]) -> f64 {
    if log_weights.is_empty() {
        return 0.0;
    }
    100.0 * ess_log_weights(log_weights) / log_weights.len() as f64
}

/// Draws from the Gaussian approximation and their importance log-weights.
#[derive(Debug, Clone)]
pub struct ImportanceSample {
    /// State paths.
    pub samples: Vec<Vec<DVector<f64>>>,
    /// `log p(y | s) - log g(z | s)` per path (unnormalised).
    pub log_weights: Vec<f64>,
}

/// Sample the smoothing distribution of the Gaussian pseudo-model `(z, Ω)` and
/// weight each draw by `log p(y | s) - log g(z | s)`.
///
/// The state prior is shared by target and proposal, so it cancels.
pub fn laplace_importance_sampling<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    z: &[DVector<f64>],
    omega: &[DMatrix<f64>],
    n: usize,
    key: Key,
) -> Result<ImportanceSample> {
    let glssm = model.to_glssm(omega.to_vec())?;
    let samples = ffbs(z, &glssm, n, key)?;
    let log_weights = samples
        .par_iter()
        .map(|x| -> Result<f64> {
            let log_p: f64 = model.log_probs_y(x, y)?.iter().sum();
            let log_g: f64 = glssm.log_probs_y(x, z)?.iter().sum();
            Ok(log_p - log_g)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ImportanceSample { samples, log_weights })
}

fn check_weighted(n_samples: usize, n_weights: usize) -> Result<()> {
    if n_samples == 0 {
        return Err(Error::Validation("need at least one sample".to_string()));
    }
    if n_samples != n_weights {
        return Err(Error::Validation(format!("{} samples but {} log-weights", n_samples, n_weights)));
    }
    Ok(())
}

fn weighted_mean(values: &[DVector<f64>], weights: &[f64]) -> Result<DVector<f64>> {
    let k = values.first().map_or(0, |v| v.len());
    if values.iter().any(|v| v.len() != k) {
        return Err(Error::Validation("functional values must share one length".to_string()));
    }
    let mut acc = DVector::zeros(k);
    for (v, &w) in values.iter().zip(weights) {
        acc.axpy(w, v, 1.0);
    }
    Ok(acc)
}

/// Self-normalised estimate `Σ_i w_i f(x_i)` of `E[f(X) | y]`.
pub fn mc_integration<F>(samples: &[Vec<DVector<f64>>], log_weights: &[f64], f: F) -> Result<DVector<f64>>
where
    F: Fn(&[DVector<f64>]) -> Result<DVector<f64>> + Sync,
{
    check_weighted(samples.len(), log_weights.len())?;
    let values = samples.par_iter().map(|x| f(x)).collect::<Result<Vec<_>>>()?;
    weighted_mean(&values, &normalize_log_weights(log_weights))
}

/// Weighted quantiles: for each `p` in `probs`, the smallest value whose
/// cumulative normalised weight reaches `p`.
///
/// NaN values or weights, or a non-positive total weight, give NaN quantiles.
pub fn prediction_percentiles(values: &[f64], weights: &[f64], probs: &[f64]) -> Result<Vec<f64>> {
    check_weighted(values.len(), weights.len())?;
    if let Some(p) = probs.iter().find(|p| !(0.0..=1.0).contains(*p)) {
        return Err(Error::Validation(format!("probabilities must lie in [0, 1], got {}", p)));
    }
    let total: f64 = weights.iter().sum();
    if values.iter().chain(weights).any(|v| v.is_nan()) || total.is_nan() || total <= 0.0 {
        return Ok(vec![f64::NAN; probs.len()]);
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut acc = 0.0;
    let cumulative: Vec<f64> = order
        .iter()
        .map(|&i| {
            acc += weights[i] / total;
            acc
        })
        .collect();
    Ok(probs
        .iter()
        .map(|&p| {
            let idx = cumulative.partition_point(|&c| c < p).min(order.len() - 1);
            values[order[idx]]
        })
        .collect())
}

/// Weighted mean, standard deviation and quantiles of a vector functional.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Weighted mean per component.
    pub mean: DVector<f64>,
    /// Weighted standard deviation per component.
    pub sd: DVector<f64>,
    /// `quantiles[(j, k)]` is the `probs[k]` quantile of component `j`.
    pub quantiles: DMatrix<f64>,
}

fn weighted_summary(values: &[DVector<f64>], weights: &[f64], probs: &[f64]) -> Result<Prediction> {
    let mean = weighted_mean(values, weights)?;
    let k = mean.len();
    let mut sd = DVector::zeros(k);
    let mut quantiles = DMatrix::zeros(k, probs.len());
    let mut column = vec![0.0; values.len()];
    for j in 0..k {
        for (c, v) in column.iter_mut().zip(values) {
            *c = v[j];
        }
        let var: f64 = column.iter().zip(weights).map(|(c, w)| w * (c - mean[j]).powi(2)).sum();
        sd[j] = var.sqrt();
        let q = prediction_percentiles(&column, weights, probs)?;
        quantiles.row_mut(j).copy_from_slice(&q);
    }
    Ok(Prediction { mean, sd, quantiles })
}

/// Weighted predictive summary of `f(x, s, y')` over importance samples.
///
/// For every state path `x` the signal `s` is computed and a replicate
/// `y' ~ p(y | s)` is drawn; `f` maps the triple to a vector whose components
/// are summarised with the self-normalised weights.
pub fn prediction<D, F>(
    model: &Pgssm<D>,
    samples: &[Vec<DVector<f64>>],
    log_weights: &[f64],
    f: F,
    probs: &[f64],
    key: Key,
) -> Result<Prediction>
where
    D: ObservationDistribution,
    F: Fn(&[DVector<f64>], &[DVector<f64>], &[DVector<f64>]) -> Result<DVector<f64>> + Sync,
{
    check_weighted(samples.len(), log_weights.len())?;
    let values = samples
        .par_iter()
        .zip(key.split_n(samples.len()))
        .map(|(x, k)| {
            validate_series(x, model.n_steps(), model.state_dim(), "sample")?;
            let y_new = sample_observations(model, x, k)?;
            f(x, &model.signals(x), &y_new)
        })
        .collect::<Result<Vec<_>>>()?;
    weighted_summary(&values, &normalize_log_weights(log_weights), probs)
}

/// Pointwise predictive quantiles of new observations, one `p x probs.len()`
/// matrix per time step.
///
/// To forecast, extend the model past the data and mark the extra
/// observations missing (NaN); their intervals come out of the same draws.
pub fn future_prediction_interval<D: ObservationDistribution>(
    model: &Pgssm<D>,
    samples: &[Vec<DVector<f64>>],
    log_weights: &[f64],
    probs: &[f64],
    key: Key,
) -> Result<Vec<DMatrix<f64>>> {
    let p = model.obs_dim();
    let summary = prediction(
        model,
        samples,
        log_weights,
        |_, _, y_new| Ok(DVector::from_vec(flatten_vectors(y_new))),
        probs,
        key,
    )?;
    Ok((0..model.n_steps()).map(|t| summary.quantiles.rows(t * p, p).into_owned()).collect())
}

/// Laplace importance sampling at `mode` followed by [`prediction`].
pub fn predict<D, F>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    mode: &ModeEstimate,
    n: usize,
    f: F,
    probs: &[f64],
    key: Key,
) -> Result<Prediction>
where
    D: ObservationDistribution,
    F: Fn(&[DVector<f64>], &[DVector<f64>], &[DVector<f64>]) -> Result<DVector<f64>> + Sync,
{
    let (is_key, pred_key) = key.split();
    let is = laplace_importance_sampling(y, model, &mode.z, &mode.omega, n, is_key)?;
    prediction(model, &is.samples, &is.log_weights, f, probs, pred_key)
}
