//! Mode estimation / Laplace approximation for partially Gaussian models.
//!
//! Around a working signal `s` the observation log-density is replaced by its
//! second-order expansion, which is a Gaussian pseudo-observation
//! `z = s + ∇ / Γ` with variance `Ω = 1 / Γ`, `Γ = -∇²` (diagonal, since
//! coordinates are conditionally independent). The pseudo-model is a GLSSM, so
//! the next working signal is its smoothed signal. At the fixed point `s` is the
//! posterior mode of the signal.

use isssm_core::{IterationReport, ObservationDistribution, Result, Termination};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

use crate::config::ModeEstimationConfig;
use crate::disturbance::smoothed_signals;
use crate::kalman::{kalman_filter, kalman_smoother};
use crate::linalg::{any_nan, max_relative_change};
use crate::model::{Pgssm, validate_series};

/// Newton steps per coordinate in [`initial_guess`].
const INITIAL_GUESS_STEPS: usize = 50;

/// Gaussian approximation at the mode.
#[derive(Debug, Clone)]
pub struct ModeEstimate {
    /// Smoothed states of the final pseudo-model.
    pub x_smooth: Vec<DVector<f64>>,
    /// Final working signal.
    pub signal: Vec<DVector<f64>>,
    /// Pseudo-observations (NaN where `y` is missing).
    pub z: Vec<DVector<f64>>,
    /// Diagonal pseudo-observation covariances.
    pub omega: Vec<DMatrix<f64>>,
    /// Iteration count and stop reason.
    pub report: IterationReport,
}

struct Linearization {
    signal: Vec<DVector<f64>>,
    z: Vec<DVector<f64>>,
    omega: Vec<DMatrix<f64>>,
}

/// One Newton step: linearize at `s`, then smooth the pseudo-model.
fn iterate<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    s: &[DVector<f64>],
) -> Result<Linearization> {
    let p = model.obs_dim();
    let mut z = Vec::with_capacity(y.len());
    let mut omega = Vec::with_capacity(y.len());
    for t in 0..y.len() {
        let mut zt = DVector::zeros(p);
        let mut om = DMatrix::zeros(p, p);
        for i in 0..p {
            if y[t][i].is_nan() {
                // Dropped by the filter; unit variance keeps the pseudo-model valid.
                zt[i] = f64::NAN;
                om[(i, i)] = 1.0;
                continue;
            }
            let (yi, si, xi) = (y[t][i], s[t][i], model.xi[t][i]);
            let grad = model.dist.d_log_prob(yi, si, xi)?;
            let gamma = -model.dist.d2_log_prob(yi, si, xi)?;
            zt[i] = si + grad / gamma;
            om[(i, i)] = 1.0 / gamma;
        }
        z.push(zt);
        omega.push(om);
    }

    // Γ <= 0 or non-finite derivatives: hand NaN back so the loop stops.
    let finite = omega.iter().all(|o| o.iter().all(|v| v.is_finite() && *v >= 0.0))
        && z.iter().all(|zt| zt.iter().all(|v| !v.is_infinite()));
    if !finite {
        let signal = vec![DVector::from_element(p, f64::NAN); y.len()];
        return Ok(Linearization { signal, z, omega });
    }
    let glssm = model.to_glssm(omega.clone())?;
    let filtered = kalman_filter(&z, &glssm)?;
    let signal = smoothed_signals(&filtered, &z, &glssm)?;
    Ok(Linearization { signal, z, omega })
}

/// Observed entries of `z` followed by the matching diagonal entries of `Ω`.
fn tracked_values(y: &[DVector<f64>], lin: &Linearization) -> Vec<f64> {
    let mut out = Vec::new();
    for (t, yt) in y.iter().enumerate() {
        for i in 0..yt.len() {
            if !yt[i].is_nan() {
                out.push(lin.z[t][i]);
                out.push(lin.omega[t][(i, i)]);
            }
        }
    }
    out
}

/// Iterate the Laplace linearization from `s_init` until `z` and `Ω` settle.
///
/// Two iterations always run before the first convergence check. The loop
/// stops when the relative sup-norm change of both is below `config.eps`, when
/// any of them becomes NaN (reported as [`Termination::NonFinite`]), or after
/// `config.n_iter` iterations.
pub fn mode_estimation<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    s_init: &[DVector<f64>],
    config: &ModeEstimationConfig,
) -> Result<ModeEstimate> {
    config.validate()?;
    validate_series(y, model.n_steps(), model.obs_dim(), "y")?;
    validate_series(s_init, model.n_steps(), model.obs_dim(), "s_init")?;

    let first = iterate(y, model, s_init)?;
    let mut current = iterate(y, model, &first.signal)?;
    let mut old_values = tracked_values(y, &first);
    let mut iterations = 2;

    let termination = loop {
        let values = tracked_values(y, &current);
        let change = max_relative_change(&values, &old_values);
        debug!("mode estimation iteration {}: max relative change {:.3e}", iterations, change);
        let nan = any_nan(&values) || current.signal.iter().any(|s| s.iter().any(|v| v.is_nan()));
        if let Some(reason) =
            Termination::from_flags(nan, change < config.eps, iterations >= config.n_iter)
        {
            break reason;
        }
        let next = iterate(y, model, &current.signal)?;
        old_values = values;
        current = next;
        iterations += 1;
    };

    match termination {
        Termination::NonFinite => warn!("mode estimation stopped on NaN after {} iterations", iterations),
        Termination::IterationLimit => {
            debug!("mode estimation hit the iteration limit ({})", config.n_iter)
        }
        Termination::Converged => debug!("mode estimation converged after {} iterations", iterations),
    }

    let x_smooth = if termination == Termination::NonFinite {
        vec![DVector::from_element(model.state_dim(), f64::NAN); model.n_steps()]
    } else {
        let glssm = model.to_glssm(current.omega.clone())?;
        kalman_smoother(&kalman_filter(&current.z, &glssm)?, &glssm.a)?.x_smooth
    };

    Ok(ModeEstimate {
        x_smooth,
        signal: current.signal,
        z: current.z,
        omega: current.omega,
        report: IterationReport { iterations, termination },
    })
}

/// Default starting signal for [`mode_estimation`].
///
/// Each observed coordinate gets the maximiser of
/// `log p(y | s) - (s - m)² / 2`, where `m` is the prior mean of the signal;
/// the unit penalty keeps the maximiser finite for counts at the boundary
/// (e.g. `y = 0` under a log link). Missing coordinates, and coordinates whose
/// Newton iteration leaves the finite range, fall back to `m`.
pub fn initial_guess<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
) -> Result<Vec<DVector<f64>>> {
    validate_series(y, model.n_steps(), model.obs_dim(), "y")?;
    let mut s = model.signals(&model.state().prior_means());
    for (t, st) in s.iter_mut().enumerate() {
        for i in 0..st.len() {
            if y[t][i].is_nan() {
                continue;
            }
            let (yi, xi, m) = (y[t][i], model.xi[t][i], st[i]);
            let mut si = m;
            for _ in 0..INITIAL_GUESS_STEPS {
                let grad = model.dist.d_log_prob(yi, si, xi)? - (si - m);
                let hess = model.dist.d2_log_prob(yi, si, xi)? - 1.0;
                let step = grad / hess;
                si -= step;
                if !si.is_finite() || hess >= 0.0 {
                    si = m;
                    break;
                }
                if step.abs() < 1e-10 {
                    break;
                }
            }
            st[i] = si;
        }
    }
    Ok(s)
}

/// [`mode_estimation`] started from [`initial_guess`].
pub fn posterior_mode<D: ObservationDistribution>(
    y: &[DVector<f64>],
    model: &Pgssm<D>,
    config: &ModeEstimationConfig,
) -> Result<ModeEstimate> {
    let s_init = initial_guess(y, model)?;
    mode_estimation(y, model, &s_init, config)
}
