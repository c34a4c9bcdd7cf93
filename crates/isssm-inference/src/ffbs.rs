//! Forward-filter backward-sampling (Frühwirth-Schnatter 1994).

use isssm_core::{Error, Key, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::kalman::{FilterResult, kalman_filter};
use crate::linalg::{degenerate_cholesky, pinv_symmetric, standard_normal, symmetrize};
use crate::model::Glssm;

/// Backward kernel `X_t | X_{t+1} ~ N(x_filt_t + G_t (X_{t+1} - x_pred_{t+1}), root_t root_tᵀ)`.
struct BackwardStep {
    gain: DMatrix<f64>,
    root: DMatrix<f64>,
}

/// Draw `n` state paths from `p(x | y)` given a completed filter run.
pub fn simulate_smoothed(
    filtered: &FilterResult,
    a: &[DMatrix<f64>],
    n: usize,
    key: Key,
) -> Result<Vec<Vec<DVector<f64>>>> {
    let np1 = filtered.x_filt.len();
    if np1 == 0 || a.len() + 1 != np1 {
        return Err(Error::Validation(format!(
            "filter result has {} steps but {} transition matrices were given",
            np1,
            a.len()
        )));
    }
    let m = filtered.x_filt[0].len();

    let last_root = degenerate_cholesky(&filtered.xi_filt[np1 - 1])?;
    let steps = (0..np1 - 1)
        .map(|t| -> Result<BackwardStep> {
            let xi_filt = &filtered.xi_filt[t];
            let gain = xi_filt * a[t].transpose() * pinv_symmetric(&filtered.xi_pred[t + 1])?;
            let cond_cov = xi_filt - &gain * &filtered.xi_pred[t + 1] * gain.transpose();
            let root = degenerate_cholesky(&symmetrize(&cond_cov))?;
            Ok(BackwardStep { gain, root })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(key
        .split_n(n)
        .into_par_iter()
        .map(|k| {
            let mut rng = k.rng();
            let mut path = vec![DVector::zeros(m); np1];
            path[np1 - 1] = &filtered.x_filt[np1 - 1] + &last_root * standard_normal(m, &mut rng);
            for t in (0..np1 - 1).rev() {
                let step = &steps[t];
                let mean = &filtered.x_filt[t] + &step.gain * (&path[t + 1] - &filtered.x_pred[t + 1]);
                path[t] = mean + &step.root * standard_normal(m, &mut rng);
            }
            path
        })
        .collect())
}

/// Filter `y` once, then draw `n` smoothing paths.
pub fn ffbs(y: &[DVector<f64>], model: &Glssm, n: usize, key: Key) -> Result<Vec<Vec<DVector<f64>>>> {
    let filtered = kalman_filter(y, model)?;
    simulate_smoothed(&filtered, &model.a, n, key)
}
