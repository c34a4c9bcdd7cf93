//! Kalman filter and smoother for linear Gaussian state space models.
//!
//! Innovation and predicted covariances may be singular (degenerate `Ω`,
//! noise-free signal observation, dropped coordinates), so gains use
//! pseudo-inverses throughout.

use isssm_core::{Error, Result};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::linalg::{mvn_log_density, pinv_symmetric, symmetrize};
use crate::model::{Glssm, account_for_nans, observed_indices};

/// Kalman filter output, one entry per time step `0..=n`.
#[derive(Debug, Clone)]
pub struct FilterResult {
    /// Filtered means `E[X_t | y_0..y_t]`.
    pub x_filt: Vec<DVector<f64>>,
    /// Filtered covariances.
    pub xi_filt: Vec<DMatrix<f64>>,
    /// Predicted means `E[X_t | y_0..y_{t-1}]` (`u_0` at `t = 0`).
    pub x_pred: Vec<DVector<f64>>,
    /// Predicted covariances (`Σ_0` at `t = 0`).
    pub xi_pred: Vec<DMatrix<f64>>,
    /// `log p(y_0..y_n)` over the observed coordinates.
    pub log_likelihood: f64,
}

/// Smoother output, one entry per time step `0..=n`.
#[derive(Debug, Clone)]
pub struct SmootherResult {
    /// Smoothed means `E[X_t | y_0..y_n]`.
    pub x_smooth: Vec<DVector<f64>>,
    /// Smoothed covariances.
    pub xi_smooth: Vec<DMatrix<f64>>,
}

/// `log N(residual; 0, psi)` restricted to the coordinates observed in `y_raw`.
pub(crate) fn observed_log_density(
    y_raw: &DVector<f64>,
    residual: &DVector<f64>,
    psi: &DMatrix<f64>,
) -> Result<f64> {
    let idx = observed_indices(y_raw);
    if idx.is_empty() {
        return Ok(0.0);
    }
    let psi_o = psi.select_rows(idx.iter()).select_columns(idx.iter());
    mvn_log_density(&residual.select_rows(idx.iter()), &DVector::zeros(idx.len()), &psi_o)
}

/// Run the Kalman filter on `y` (NaN entries are missing).
///
/// The recursion starts from an implicit step `t = -1` with identity transition,
/// so the first prediction is `(u_0, Σ_0)` and every step, including `t = 0`,
/// performs an update.
pub fn kalman_filter(y: &[DVector<f64>], model: &Glssm) -> Result<FilterResult> {
    let (cleaned, y_clean) = account_for_nans(model, y)?;
    let np1 = model.n_steps();
    let m = model.state_dim();
    let eye = DMatrix::<f64>::identity(m, m);
    let state = cleaned.state();

    let mut x_filt: Vec<DVector<f64>> = Vec::with_capacity(np1);
    let mut xi_filt: Vec<DMatrix<f64>> = Vec::with_capacity(np1);
    let mut x_pred = Vec::with_capacity(np1);
    let mut xi_pred = Vec::with_capacity(np1);
    let mut loglik = 0.0;

    for t in 0..np1 {
        let (xp, pp) = if t == 0 {
            (cleaned.u[0].clone(), cleaned.sigma0.clone())
        } else {
            let a = &cleaned.a[t - 1];
            let xp = a * &x_filt[t - 1] + &cleaned.u[t];
            let pp = a * &xi_filt[t - 1] * a.transpose() + state.innovation_cov(t - 1);
            (xp, symmetrize(&pp))
        };

        let b = &cleaned.b[t];
        let omega = &cleaned.omega[t];
        let residual = &y_clean[t] - &cleaned.v[t] - b * &xp;
        let psi = symmetrize(&(b * &pp * b.transpose() + omega));
        let k = &pp * b.transpose() * pinv_symmetric(&psi)?;

        loglik += observed_log_density(&y[t], &residual, &psi)?;

        // Joseph form keeps the update PSD for any gain.
        let i_kb = &eye - &k * b;
        let pf = &i_kb * &pp * i_kb.transpose() + &k * omega * k.transpose();

        x_filt.push(&xp + &k * residual);
        xi_filt.push(symmetrize(&pf));
        x_pred.push(xp);
        xi_pred.push(pp);
    }

    Ok(FilterResult { x_filt, xi_filt, x_pred, xi_pred, log_likelihood: loglik })
}

/// Negative log-likelihood `-log p(y)` of `model`.
pub fn negative_log_likelihood(y: &[DVector<f64>], model: &Glssm) -> Result<f64> {
    Ok(-kalman_filter(y, model)?.log_likelihood)
}

/// Rauch–Tung–Striebel smoother.
///
/// `a` are the transition matrices used by the filter (one fewer than steps).
pub fn kalman_smoother(filtered: &FilterResult, a: &[DMatrix<f64>]) -> Result<SmootherResult> {
    let np1 = filtered.x_filt.len();
    if np1 == 0 {
        return Err(Error::Validation("filter result must be non-empty".to_string()));
    }
    if filtered.xi_filt.len() != np1 || filtered.x_pred.len() != np1 || filtered.xi_pred.len() != np1 {
        return Err(Error::Validation("filter result has inconsistent lengths".to_string()));
    }
    if a.len() + 1 != np1 {
        return Err(Error::Validation(format!(
            "expected {} transition matrices, got {}",
            np1 - 1,
            a.len()
        )));
    }

    let mut x_smooth = filtered.x_filt.clone();
    let mut xi_smooth = filtered.xi_filt.clone();

    for t in (0..np1 - 1).rev() {
        // G_t = Ξ_{t|t} A_tᵀ Ξ_{t+1|t}⁺
        let gain = &filtered.xi_filt[t] * a[t].transpose() * pinv_symmetric(&filtered.xi_pred[t + 1])?;

        let dx = &x_smooth[t + 1] - &filtered.x_pred[t + 1];
        x_smooth[t] = &filtered.x_filt[t] + &gain * dx;

        let dp = &filtered.xi_pred[t + 1] - &xi_smooth[t + 1];
        let p = &filtered.xi_filt[t] - &gain * dp * gain.transpose();
        xi_smooth[t] = symmetrize(&p);
    }

    Ok(SmootherResult { x_smooth, xi_smooth })
}

/// Smoothed state distribution given an exactly observed signal `v + B x`.
pub fn state_conditional_on_signal(model: &Glssm, signal: &[DVector<f64>]) -> Result<SmootherResult> {
    let signal_model = model.signal_model();
    let filtered = kalman_filter(signal, &signal_model)?;
    kalman_smoother(&filtered, &signal_model.a)
}

/// Most likely state path given an exactly observed signal.
pub fn state_mode(model: &Glssm, signal: &[DVector<f64>]) -> Result<Vec<DVector<f64>>> {
    Ok(state_conditional_on_signal(model, signal)?.x_smooth)
}

/// Marginal normal bands per time step and state coordinate.
#[derive(Debug, Clone)]
pub struct MarginalIntervals {
    /// Alpha for the two-sided interval (e.g. 0.05 means 95% interval).
    pub alpha: f64,
    /// Standard normal z-value for `1 - alpha/2`.
    pub z: f64,
    /// Lower bounds.
    pub lower: Vec<DVector<f64>>,
    /// Upper bounds.
    pub upper: Vec<DVector<f64>>,
}

fn marginal_intervals(
    means: &[DVector<f64>],
    covs: &[DMatrix<f64>],
    alpha: f64,
) -> Result<MarginalIntervals> {
    if !(alpha.is_finite() && alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation("alpha must be in (0, 1)".to_string()));
    }
    if means.len() != covs.len() {
        return Err(Error::Validation("means and covariances have inconsistent lengths".to_string()));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| Error::Validation(format!("failed to construct normal distribution: {e}")))?;
    let z = normal.inverse_cdf(1.0 - 0.5 * alpha);

    let mut lower = Vec::with_capacity(means.len());
    let mut upper = Vec::with_capacity(means.len());
    for (mu, cov) in means.iter().zip(covs) {
        let mut lo = mu.clone();
        let mut hi = mu.clone();
        for i in 0..mu.len() {
            let var = cov[(i, i)];
            if !var.is_finite() || var < -1e-10 * (1.0 + cov.amax()) {
                return Err(Error::Computation(format!("invalid marginal variance {}", var)));
            }
            let sd = var.max(0.0).sqrt();
            lo[i] -= z * sd;
            hi[i] += z * sd;
        }
        lower.push(lo);
        upper.push(hi);
    }
    Ok(MarginalIntervals { alpha, z, lower, upper })
}

/// Pointwise `1 - alpha` bands of the filtered states.
pub fn filter_intervals(filtered: &FilterResult, alpha: f64) -> Result<MarginalIntervals> {
    marginal_intervals(&filtered.x_filt, &filtered.xi_filt, alpha)
}

/// Pointwise `1 - alpha` bands of the smoothed states.
pub fn smoother_intervals(smoothed: &SmootherResult, alpha: f64) -> Result<MarginalIntervals> {
    marginal_intervals(&smoothed.x_smooth, &smoothed.xi_smooth, alpha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::LN_2PI;

    fn scalar(v: f64) -> DMatrix<f64> {
        DMatrix::from_element(1, 1, v)
    }

    fn series(y: &[f64]) -> Vec<DVector<f64>> {
        y.iter().map(|&v| DVector::from_row_slice(&[v])).collect()
    }

    fn scalar_model(y_len: usize, f: f64, q: f64, h: f64, r: f64, m0: f64, p0: f64) -> Glssm {
        let n = y_len - 1;
        Glssm::from_parts(
            DVector::from_row_slice(&[m0]),
            vec![scalar(f); n],
            scalar(p0),
            vec![scalar(q); n],
            vec![scalar(h); n + 1],
            vec![scalar(r); n + 1],
        )
        .unwrap()
    }

    /// Scalar filter: returns (filtered means, filtered vars, predicted means, predicted vars, loglik).
    fn scalar_filter(
        y: &[f64],
        f: f64,
        q: f64,
        h: f64,
        r: f64,
        m0: f64,
        p0: f64,
    ) -> (Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>, f64) {
        let mut m_pred = m0;
        let mut p_pred = p0;
        let (mut mf, mut pf, mut mp, mut pp) = (vec![], vec![], vec![], vec![]);
        let mut ll = 0.0;
        for &yt in y {
            mp.push(m_pred);
            pp.push(p_pred);
            let (m, p) = if yt.is_nan() {
                (m_pred, p_pred)
            } else {
                let v = yt - h * m_pred;
                let s = h * h * p_pred + r;
                let k = p_pred * h / s;
                ll += -0.5 * (LN_2PI + s.ln() + v * v / s);
                (m_pred + k * v, (1.0 - k * h) * p_pred)
            };
            mf.push(m);
            pf.push(p);
            m_pred = f * m;
            p_pred = f * f * p + q;
        }
        (mf, pf, mp, pp, ll)
    }

    fn assert_close(a: f64, b: f64, tol: f64) {
        let d = (a - b).abs();
        assert!(d <= tol, "a={} b={} |diff|={}", a, b, d);
    }

    #[test]
    fn test_kalman_filter_matches_scalar_reference() {
        let y = vec![0.9, 1.2, 0.8, 1.1];
        let (mf, pf, mp, pp, ll) = scalar_filter(&y, 1.0, 0.1, 1.0, 0.2, 0.0, 1.0);
        let model = scalar_model(y.len(), 1.0, 0.1, 1.0, 0.2, 0.0, 1.0);
        let fr = kalman_filter(&series(&y), &model).unwrap();

        for t in 0..y.len() {
            assert_close(fr.x_filt[t][0], mf[t], 1e-12);
            assert_close(fr.xi_filt[t][(0, 0)], pf[t], 1e-12);
            assert_close(fr.x_pred[t][0], mp[t], 1e-12);
            assert_close(fr.xi_pred[t][(0, 0)], pp[t], 1e-12);
        }
        assert_close(fr.log_likelihood, ll, 1e-12);
        assert_close(negative_log_likelihood(&series(&y), &model).unwrap(), -ll, 1e-12);
    }

    #[test]
    fn test_kalman_filter_allows_missing_obs_as_nan() {
        let y = vec![0.9, f64::NAN, 0.8, 1.1];
        let (mf, pf, _, _, ll) = scalar_filter(&y, 0.9, 0.1, 1.0, 0.2, 0.0, 1.0);
        let model = scalar_model(y.len(), 0.9, 0.1, 1.0, 0.2, 0.0, 1.0);
        let fr = kalman_filter(&series(&y), &model).unwrap();
        for t in 0..y.len() {
            assert_close(fr.x_filt[t][0], mf[t], 1e-12);
            assert_close(fr.xi_filt[t][(0, 0)], pf[t], 1e-12);
        }
        assert_close(fr.log_likelihood, ll, 1e-12);
    }

    #[test]
    fn test_kalman_filter_partial_missing_multivariate_decoupled_matches_scalar_refs() {
        let n = 3;
        let model = Glssm::from_parts(
            DVector::zeros(2),
            vec![DMatrix::identity(2, 2); n],
            DMatrix::identity(2, 2),
            vec![DMatrix::from_row_slice(2, 2, &[0.1, 0.0, 0.0, 0.2]); n],
            vec![DMatrix::identity(2, 2); n + 1],
            vec![DMatrix::from_row_slice(2, 2, &[0.3, 0.0, 0.0, 0.4]); n + 1],
        )
        .unwrap();

        let y0 = vec![0.9, 1.0, 0.8, f64::NAN];
        let y1 = vec![1.1, f64::NAN, 0.95, 1.05];
        let ys: Vec<DVector<f64>> = (0..y0.len()).map(|t| DVector::from_row_slice(&[y0[t], y1[t]])).collect();
        let fr = kalman_filter(&ys, &model).unwrap();

        let (m0_ref, p0_ref, _, _, ll0) = scalar_filter(&y0, 1.0, 0.1, 1.0, 0.3, 0.0, 1.0);
        let (m1_ref, p1_ref, _, _, ll1) = scalar_filter(&y1, 1.0, 0.2, 1.0, 0.4, 0.0, 1.0);
        for t in 0..y0.len() {
            assert_close(fr.x_filt[t][0], m0_ref[t], 1e-12);
            assert_close(fr.xi_filt[t][(0, 0)], p0_ref[t], 1e-12);
            assert_close(fr.x_filt[t][1], m1_ref[t], 1e-12);
            assert_close(fr.xi_filt[t][(1, 1)], p1_ref[t], 1e-12);
            assert!(fr.xi_filt[t][(0, 1)].abs() <= 1e-12);
        }
        assert_close(fr.log_likelihood, ll0 + ll1, 1e-12);
    }

    #[test]
    fn test_noise_free_observation_pins_state() {
        let y = vec![0.4, -0.3, 1.7];
        let model = scalar_model(y.len(), 0.8, 0.5, 1.0, 0.0, 0.0, 2.0);
        let fr = kalman_filter(&series(&y), &model).unwrap();
        for t in 0..y.len() {
            assert_close(fr.x_filt[t][0], y[t], 1e-10);
            assert_close(fr.xi_filt[t][(0, 0)], 0.0, 1e-10);
        }
        assert!(fr.log_likelihood.is_finite());
    }

    #[test]
    fn test_rts_smoother_matches_scalar_reference() {
        let y = vec![0.9, 1.2, f64::NAN, 0.8, 1.1];
        let (f, q, h, r, m0, p0) = (0.7, 0.1, 1.0, 0.2, 0.3, 1.0);
        let (mf, pf, mp, pp, _) = scalar_filter(&y, f, q, h, r, m0, p0);
        let model = scalar_model(y.len(), f, q, h, r, m0, p0);
        let fr = kalman_filter(&series(&y), &model).unwrap();
        let sr = kalman_smoother(&fr, &model.a).unwrap();

        let n = y.len() - 1;
        let mut ms = mf.clone();
        let mut ps = pf.clone();
        for t in (0..n).rev() {
            let g = pf[t] * f / pp[t + 1];
            ms[t] = mf[t] + g * (ms[t + 1] - mp[t + 1]);
            ps[t] = pf[t] - g * (pp[t + 1] - ps[t + 1]) * g;
        }
        for t in 0..=n {
            assert_close(sr.x_smooth[t][0], ms[t], 1e-12);
            assert_close(sr.xi_smooth[t][(0, 0)], ps[t], 1e-12);
        }
        assert_eq!(sr.x_smooth[n], fr.x_filt[n]);
        assert_eq!(sr.xi_smooth[n], fr.xi_filt[n]);
    }

    #[test]
    fn test_smoother_rejects_mismatched_transitions() {
        let y = series(&[0.1, 0.2]);
        let model = scalar_model(2, 1.0, 0.1, 1.0, 0.2, 0.0, 1.0);
        let fr = kalman_filter(&y, &model).unwrap();
        assert!(matches!(kalman_smoother(&fr, &[]), Err(Error::Validation(_))));
    }

    #[test]
    fn test_filter_rejects_infinite_observations() {
        let model = scalar_model(2, 1.0, 0.1, 1.0, 0.2, 0.0, 1.0);
        assert!(kalman_filter(&series(&[0.0, f64::INFINITY]), &model).is_err());
    }

    #[test]
    fn test_state_mode_recovers_random_walk_path() {
        // Signal = state, so conditioning on the signal returns it exactly.
        let s = series(&[0.5, 0.1, -0.4, 0.2]);
        let model = scalar_model(4, 1.0, 0.3, 1.0, 1.0, 0.0, 1.0);
        let x = state_mode(&model, &s).unwrap();
        for t in 0..4 {
            assert_close(x[t][0], s[t][0], 1e-10);
        }
    }

    #[test]
    fn test_intervals_use_marginal_sd() {
        let y = series(&[0.9, 1.2]);
        let model = scalar_model(2, 1.0, 0.1, 1.0, 0.2, 0.0, 1.0);
        let fr = kalman_filter(&y, &model).unwrap();
        let iv = filter_intervals(&fr, 0.05).unwrap();
        assert_close(iv.z, 1.959_963_984_540_054, 1e-9);
        for t in 0..2 {
            let sd = fr.xi_filt[t][(0, 0)].sqrt();
            assert_close(iv.lower[t][0], fr.x_filt[t][0] - iv.z * sd, 1e-12);
            assert_close(iv.upper[t][0], fr.x_filt[t][0] + iv.z * sd, 1e-12);
        }
        let sr = kalman_smoother(&fr, &model.a).unwrap();
        assert!(smoother_intervals(&sr, 1.5).is_err());
    }
}
