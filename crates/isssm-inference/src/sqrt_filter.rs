//! Square-root Kalman filter.
//!
//! Carries upper-triangular roots `R` with `Ξ = RᵀR` instead of covariances and
//! obtains gains and updated roots from QR decompositions of stacked pre-arrays.
//!
//! Update at step `t`, with `S_Ω` an upper root of `Ω_t` and `R_p` of `Ξ_{t|t-1}`:
//!
//! ```text
//! M = | S_Ω        0   |  = Q | U11  U12 |
//!     | R_p B_tᵀ  R_p  |      |  0   U22 |
//! ```
//!
//! so that `Ψ = U11ᵀU11`, `Kᵀ = U11⁻¹U12` and `Ξ_{t|t} = U22ᵀU22`.

use isssm_core::{Error, Result};
use nalgebra::{DMatrix, DVector};

use crate::kalman::{FilterResult, observed_log_density};
use crate::linalg::{degenerate_cholesky, with_nonnegative_diagonal};
use crate::model::{Glssm, account_for_nans};

/// Square-root filter output, one entry per time step `0..=n`.
#[derive(Debug, Clone)]
pub struct SqrtFilterResult {
    /// Filtered means.
    pub x_filt: Vec<DVector<f64>>,
    /// Upper-triangular roots of the filtered covariances.
    pub r_filt: Vec<DMatrix<f64>>,
    /// Predicted means.
    pub x_pred: Vec<DVector<f64>>,
    /// Upper-triangular roots of the predicted covariances.
    pub r_pred: Vec<DMatrix<f64>>,
    /// `log p(y_0..y_n)` over the observed coordinates.
    pub log_likelihood: f64,
}

impl SqrtFilterResult {
    /// Expand the roots into covariances.
    pub fn to_filter_result(&self) -> FilterResult {
        let gram = |r: &DMatrix<f64>| r.transpose() * r;
        FilterResult {
            x_filt: self.x_filt.clone(),
            xi_filt: self.r_filt.iter().map(gram).collect(),
            x_pred: self.x_pred.clone(),
            xi_pred: self.r_pred.iter().map(gram).collect(),
            log_likelihood: self.log_likelihood,
        }
    }
}

fn upper_root(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    Ok(degenerate_cholesky(cov)?.transpose())
}

/// Upper-triangular `R` with `RᵀR = NᵀN` for a tall or square pre-array `N`.
fn triangularize(pre: DMatrix<f64>) -> DMatrix<f64> {
    with_nonnegative_diagonal(pre.qr().r())
}

fn stack_rows(top: &DMatrix<f64>, bottom: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(top.nrows() + bottom.nrows(), top.ncols());
    out.rows_mut(0, top.nrows()).copy_from(top);
    out.rows_mut(top.nrows(), bottom.nrows()).copy_from(bottom);
    out
}

/// Measurement update on roots. Returns `(K, R_filt, Ψ)`.
fn sqrt_update(
    r_pred: &DMatrix<f64>,
    b: &DMatrix<f64>,
    s_omega: &DMatrix<f64>,
) -> Result<(DMatrix<f64>, DMatrix<f64>, DMatrix<f64>)> {
    let p = b.nrows();
    let m = b.ncols();
    let mut pre = DMatrix::zeros(p + m, p + m);
    pre.view_mut((0, 0), (p, p)).copy_from(s_omega);
    pre.view_mut((p, 0), (m, p)).copy_from(&(r_pred * b.transpose()));
    pre.view_mut((p, p), (m, m)).copy_from(r_pred);

    let u = triangularize(pre);
    let u11 = u.view((0, 0), (p, p)).into_owned();
    let u12 = u.view((0, p), (p, m)).into_owned();
    let u22 = u.view((p, p), (m, m)).into_owned();
    let psi = u11.transpose() * &u11;

    let scale = u11.diagonal().amax();
    let regular = p == 0 || u11.diagonal().iter().all(|d| d.abs() > 1e-8 * scale);
    let solved = if regular { u11.solve_upper_triangular(&u12) } else { None };

    let (k_t, r_filt) = match solved {
        Some(k_t) => (k_t, u22),
        None => {
            let pinv = u11
                .clone()
                .pseudo_inverse(p as f64 * f64::EPSILON * u11.amax())
                .map_err(|e| Error::Computation(format!("square-root update: {}", e)))?;
            let k_t = pinv * &u12;
            // Part of U12 lies outside the range of U11 and is not absorbed by
            // the update; fold it back into the filtered root.
            let leftover = &u12 - &u11 * &k_t;
            (k_t, triangularize(stack_rows(&leftover, &u22)))
        }
    };

    Ok((k_t.transpose(), r_filt, psi))
}

/// Run the square-root filter on `y` (NaN entries are missing).
pub fn sqrt_kalman_filter(y: &[DVector<f64>], model: &Glssm) -> Result<SqrtFilterResult> {
    let (cleaned, y_clean) = account_for_nans(model, y)?;
    let np1 = model.n_steps();
    let state = cleaned.state();

    let noise_roots = (0..np1 - 1)
        .map(|t| upper_root(&state.sigma[t]))
        .collect::<Result<Vec<_>>>()?;
    let omega_roots = cleaned.omega.iter().map(upper_root).collect::<Result<Vec<_>>>()?;

    let mut x_filt: Vec<DVector<f64>> = Vec::with_capacity(np1);
    let mut r_filt: Vec<DMatrix<f64>> = Vec::with_capacity(np1);
    let mut x_pred = Vec::with_capacity(np1);
    let mut r_pred = Vec::with_capacity(np1);
    let mut loglik = 0.0;

    for t in 0..np1 {
        let (xp, rp) = if t == 0 {
            (cleaned.u[0].clone(), upper_root(&cleaned.sigma0)?)
        } else {
            let a = &cleaned.a[t - 1];
            let xp = a * &x_filt[t - 1] + &cleaned.u[t];
            // | R_f Aᵀ |
            // | S_Σ Dᵀ |
            let pre = stack_rows(
                &(&r_filt[t - 1] * a.transpose()),
                &(&noise_roots[t - 1] * cleaned.d[t - 1].transpose()),
            );
            (xp, triangularize(pre))
        };

        let b = &cleaned.b[t];
        let (k, rf, psi) = sqrt_update(&rp, b, &omega_roots[t])?;
        let residual = &y_clean[t] - &cleaned.v[t] - b * &xp;
        loglik += observed_log_density(&y[t], &residual, &psi)?;

        x_filt.push(&xp + &k * residual);
        r_filt.push(rf);
        x_pred.push(xp);
        r_pred.push(rp);
    }

    Ok(SqrtFilterResult { x_filt, r_filt, x_pred, r_pred, log_likelihood: loglik })
}
