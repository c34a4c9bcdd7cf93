//! Disturbance and signal smoothing.
//!
//! A single backward pass carries the score-like vector
//! `r_{t-1} = B_tᵀ Ψ_t⁺ ỹ_t + L_tᵀ r_t`, `L_t = A_t (I - K_t B_t)`, `r_n = 0`,
//! from which the smoothed observation disturbances and the smoothed state
//! means follow without any smoothed covariance.

use isssm_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::kalman::FilterResult;
use crate::linalg::{pinv_symmetric, symmetrize};
use crate::model::{Glssm, account_for_nans};

/// Output of [`disturbance_smoother`].
#[derive(Debug, Clone)]
pub struct DisturbanceSmootherResult {
    /// Smoothed observation disturbances `E[η_t | y]` (zero at missing coordinates).
    pub eta_smooth: Vec<DVector<f64>>,
    /// Smoothed state means `x_{t|t-1} + Ξ_{t|t-1} r_{t-1}`.
    pub x_smooth: Vec<DVector<f64>>,
}

/// Backward disturbance smoothing pass over a completed filter run.
pub fn disturbance_smoother(
    filtered: &FilterResult,
    y: &[DVector<f64>],
    model: &Glssm,
) -> Result<DisturbanceSmootherResult> {
    let (cleaned, y_clean) = account_for_nans(model, y)?;
    let np1 = model.n_steps();
    if filtered.x_pred.len() != np1 || filtered.xi_pred.len() != np1 {
        return Err(Error::Validation(format!(
            "filter result has {} steps, model has {}",
            filtered.x_pred.len(),
            np1
        )));
    }
    let m = model.state_dim();
    let eye = DMatrix::<f64>::identity(m, m);

    let mut r = DVector::<f64>::zeros(m);
    let mut eta_smooth = vec![DVector::zeros(model.obs_dim()); np1];
    let mut x_smooth = vec![DVector::zeros(m); np1];

    for t in (0..np1).rev() {
        let b = &cleaned.b[t];
        let omega = &cleaned.omega[t];
        let xp = &filtered.x_pred[t];
        let pp = &filtered.xi_pred[t];

        let psi_pinv = pinv_symmetric(&symmetrize(&(b * pp * b.transpose() + omega)))?;
        let k = pp * b.transpose() * &psi_pinv;
        let innovation = &y_clean[t] - &cleaned.v[t] - b * xp;
        let scaled = &psi_pinv * innovation;

        // A_tᵀ r_t; r_n = 0 so the last step needs no transition.
        let ar = if t + 1 < np1 { cleaned.a[t].transpose() * &r } else { DVector::zeros(m) };

        eta_smooth[t] = omega * (&scaled - k.transpose() * &ar);
        r = b.transpose() * &scaled + (&eye - &k * b).transpose() * ar;
        x_smooth[t] = xp + pp * &r;
    }

    Ok(DisturbanceSmootherResult { eta_smooth, x_smooth })
}

/// Smoothed signals `v_t + B_t E[X_t | y]`.
///
/// Observed coordinates are computed as `y - η̂`; missing coordinates, where
/// the disturbance is undefined, from the smoothed state mean.
pub fn smoothed_signals(
    filtered: &FilterResult,
    y: &[DVector<f64>],
    model: &Glssm,
) -> Result<Vec<DVector<f64>>> {
    let ds = disturbance_smoother(filtered, y, model)?;
    Ok((0..model.n_steps())
        .map(|t| {
            let mut s = &y[t] - &ds.eta_smooth[t];
            if s.iter().any(|v| v.is_nan()) {
                let from_state = &model.v[t] + &model.b[t] * &ds.x_smooth[t];
                for i in 0..s.len() {
                    if y[t][i].is_nan() {
                        s[i] = from_state[i];
                    }
                }
            }
            s
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalman::{kalman_filter, kalman_smoother};
    use approx::assert_relative_eq;

    fn model_with_omega(omega: DMatrix<f64>) -> Glssm {
        let n = 5;
        let mut u = vec![DVector::zeros(2); n + 1];
        u[0] = DVector::from_row_slice(&[1.0, 0.0]);
        Glssm::new(
            u,
            vec![DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]); n],
            vec![DMatrix::identity(2, 2); n],
            DMatrix::from_row_slice(2, 2, &[1.0, 0.2, 0.2, 0.5]),
            vec![DMatrix::from_row_slice(2, 2, &[0.1, 0.0, 0.0, 0.05]); n],
            vec![DVector::from_row_slice(&[0.3, -0.1]); n + 1],
            vec![DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 1.0]); n + 1],
            vec![omega; n + 1],
        )
        .unwrap()
    }

    fn observations() -> Vec<DVector<f64>> {
        vec![
            DVector::from_row_slice(&[1.2, 1.0]),
            DVector::from_row_slice(&[f64::NAN, 1.9]),
            DVector::from_row_slice(&[2.8, 3.6]),
            DVector::from_row_slice(&[f64::NAN, f64::NAN]),
            DVector::from_row_slice(&[4.1, 5.3]),
            DVector::from_row_slice(&[5.0, f64::NAN]),
        ]
    }

    fn check_against_state_smoother(model: &Glssm) {
        let y = observations();
        let fr = kalman_filter(&y, model).unwrap();
        let sr = kalman_smoother(&fr, &model.a).unwrap();
        let ds = disturbance_smoother(&fr, &y, model).unwrap();
        let signals = smoothed_signals(&fr, &y, model).unwrap();
        for t in 0..y.len() {
            assert_relative_eq!(ds.x_smooth[t], sr.x_smooth[t], epsilon = 1e-8);
            let expected = &model.v[t] + &model.b[t] * &sr.x_smooth[t];
            assert_relative_eq!(signals[t], expected, epsilon = 1e-8);
            for i in 0..2 {
                if y[t][i].is_nan() {
                    assert_eq!(ds.eta_smooth[t][i], 0.0);
                }
            }
        }
    }

    #[test]
    fn test_disturbance_smoother_matches_state_smoother() {
        check_against_state_smoother(&model_with_omega(DMatrix::from_row_slice(
            2,
            2,
            &[0.4, 0.1, 0.1, 0.6],
        )));
    }

    #[test]
    fn test_disturbance_smoother_degenerate_omega() {
        check_against_state_smoother(&model_with_omega(DMatrix::from_row_slice(
            2,
            2,
            &[0.5, 0.0, 0.0, 0.0],
        )));
    }

    #[test]
    fn test_exact_observation_has_zero_disturbance() {
        let model = model_with_omega(DMatrix::zeros(2, 2));
        let y = vec![DVector::from_row_slice(&[1.0, 1.5]); 6];
        let fr = kalman_filter(&y, &model).unwrap();
        let ds = disturbance_smoother(&fr, &y, &model).unwrap();
        for eta in &ds.eta_smooth {
            assert_relative_eq!(eta.norm(), 0.0, epsilon = 1e-12);
        }
    }
}
