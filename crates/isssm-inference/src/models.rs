//! Ready-made models.
//!
//! `n` is the number of transitions, so every factory returns a model with
//! `n + 1` time steps.

use isssm_core::{Error, Result};
use isssm_prob::{NegativeBinomialObservation, PoissonObservation};
use nalgebra::{DMatrix, DVector};

use crate::model::{Glssm, Pgssm};

fn scalar(v: f64) -> DMatrix<f64> {
    DMatrix::from_element(1, 1, v)
}

fn check_variance(v: f64, name: &str) -> Result<()> {
    if !v.is_finite() || v < 0.0 {
        return Err(Error::Validation(format!("{} must be finite and >= 0, got {}", name, v)));
    }
    Ok(())
}

/// Random walk observed with noise: `X_{t+1} = X_t + ε`, `Y_t = X_t + η`.
pub fn locally_constant_model(n: usize, x0: f64, s2_x0: f64, s2_eps: f64, s2_eta: f64) -> Result<Glssm> {
    check_variance(s2_x0, "s2_x0")?;
    check_variance(s2_eps, "s2_eps")?;
    check_variance(s2_eta, "s2_eta")?;
    Glssm::from_parts(
        DVector::from_element(1, x0),
        vec![scalar(1.0); n],
        scalar(s2_x0),
        vec![scalar(s2_eps); n],
        vec![scalar(1.0); n + 1],
        vec![scalar(s2_eta); n + 1],
    )
}

/// Stationary AR(1) with mean `mu`, variance `tau2` and coefficient `alpha`,
/// observed with noise variance `omega2`.
///
/// `X_0 ~ N(mu, tau2)` and `X_{t+1} = alpha X_t + (1 - alpha) mu + ε` with
/// `Var(ε) = (1 - alpha²) tau2`. The offsets `u_t = (1 - alpha) mu` for
/// `t >= 1` hold the mean at `mu` for every `t`; with zero offsets the mean
/// would decay geometrically from `mu` to zero.
pub fn ar1(mu: f64, tau2: f64, alpha: f64, omega2: f64, n: usize) -> Result<Glssm> {
    check_variance(tau2, "tau2")?;
    check_variance(omega2, "omega2")?;
    if alpha.is_nan() || alpha.abs() >= 1.0 {
        return Err(Error::Validation(format!("alpha must lie in (-1, 1), got {}", alpha)));
    }
    let mut u = vec![DVector::from_element(1, (1.0 - alpha) * mu); n + 1];
    u[0] = DVector::from_element(1, mu);
    Glssm::new(
        u,
        vec![scalar(alpha); n],
        vec![scalar(1.0); n],
        scalar(tau2),
        vec![scalar((1.0 - alpha * alpha) * tau2); n],
        vec![DVector::zeros(1); n + 1],
        vec![scalar(1.0); n + 1],
        vec![scalar(omega2); n + 1],
    )
}

/// Multivariate AR(1) `X_{t+1} - mu = alpha (X_t - mu) + ε` with stationary
/// covariance `tau`, each coordinate observed with noise variance `omega2`.
///
/// The innovation covariance is the full `(1 - alpha²) tau`, so off-diagonal
/// entries of `tau` persist over time instead of only its diagonal. As in
/// [`ar1`], offsets `(1 - alpha) mu` hold the mean at `mu`.
pub fn mv_ar1(mu: DVector<f64>, tau: DMatrix<f64>, alpha: f64, omega2: f64, n: usize) -> Result<Glssm> {
    let m = mu.len();
    if tau.nrows() != m || tau.ncols() != m {
        return Err(Error::Validation(format!("tau must be {}x{}", m, m)));
    }
    check_variance(omega2, "omega2")?;
    if alpha.is_nan() || alpha.abs() >= 1.0 {
        return Err(Error::Validation(format!("alpha must lie in (-1, 1), got {}", alpha)));
    }
    let sigma = (1.0 - alpha * alpha) * &tau;
    let mut u = vec![(1.0 - alpha) * &mu; n + 1];
    u[0] = mu;
    Glssm::new(
        u,
        vec![alpha * DMatrix::identity(m, m); n],
        vec![DMatrix::identity(m, m); n],
        tau,
        vec![sigma; n],
        vec![DVector::zeros(m); n + 1],
        vec![DMatrix::identity(m, m); n + 1],
        vec![omega2 * DMatrix::identity(m, m); n + 1],
    )
}

/// Structural time series: local linear trend plus an optional seasonal
/// component with `s_order` states, i.e. period `s_order + 1` (ignored below 2).
///
/// The state is `(level, slope, γ_1, ..., γ_s)`; the observation is
/// `level + γ_1`. Three noise sources drive level, slope and `γ_1`, so the
/// state innovation covariance is singular whenever a seasonal is present.
#[allow(clippy::too_many_arguments)]
pub fn stsm(
    x0: DVector<f64>,
    s2_mu: f64,
    s2_nu: f64,
    s2_seasonal: f64,
    n: usize,
    sigma_init: DMatrix<f64>,
    o2: f64,
    s_order: usize,
) -> Result<Glssm> {
    check_variance(s2_mu, "s2_mu")?;
    check_variance(s2_nu, "s2_nu")?;
    check_variance(o2, "o2")?;
    let seasonal = if s_order >= 2 { s_order } else { 0 };
    let m = 2 + seasonal;
    if x0.len() != m {
        return Err(Error::Validation(format!("x0 must have length {}, got {}", m, x0.len())));
    }

    let mut a = DMatrix::zeros(m, m);
    a[(0, 0)] = 1.0;
    a[(0, 1)] = 1.0;
    a[(1, 1)] = 1.0;
    let mut b = DMatrix::zeros(1, m);
    b[(0, 0)] = 1.0;
    let l = if seasonal > 0 { 3 } else { 2 };
    let mut d = DMatrix::zeros(m, l);
    d[(0, 0)] = 1.0;
    d[(1, 1)] = 1.0;
    let mut sigma_diag = vec![s2_mu, s2_nu];

    if seasonal > 0 {
        check_variance(s2_seasonal, "s2_seasonal")?;
        // γ_1' = -(γ_1 + ... + γ_s), γ_{k+1}' = γ_k
        a.view_mut((2, 2), (1, seasonal)).fill(-1.0);
        for k in 1..seasonal {
            a[(2 + k, 1 + k)] = 1.0;
        }
        b[(0, 2)] = 1.0;
        d[(2, 2)] = 1.0;
        sigma_diag.push(s2_seasonal);
    }
    let sigma = DMatrix::from_diagonal(&DVector::from_vec(sigma_diag));

    let mut u = vec![DVector::zeros(m); n + 1];
    u[0] = x0;
    Glssm::new(
        u,
        vec![a; n],
        vec![d; n],
        sigma_init,
        vec![sigma; n],
        vec![DVector::zeros(1); n + 1],
        vec![b; n + 1],
        vec![scalar(o2); n + 1],
    )
}

/// Poisson observations with log-intensity `B_t X_t` on the states of `glssm`.
pub fn poisson_pgssm(glssm: &Glssm) -> Result<Pgssm<PoissonObservation>> {
    let xi = vec![DVector::zeros(glssm.obs_dim()); glssm.n_steps()];
    Pgssm::from_glssm(glssm, PoissonObservation, xi)
}

/// Negative binomial observations with log-mean `B_t X_t` and size `r`.
pub fn negative_binomial_pgssm(glssm: &Glssm, r: f64) -> Result<Pgssm<NegativeBinomialObservation>> {
    if !r.is_finite() || r <= 0.0 {
        return Err(Error::Validation(format!("size r must be finite and > 0, got {}", r)));
    }
    let xi = vec![DVector::from_element(glssm.obs_dim(), r); glssm.n_steps()];
    Pgssm::from_glssm(glssm, NegativeBinomialObservation, xi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ar1_is_stationary() {
        let model = ar1(1.0, 2.0, 0.6, 0.5, 10).unwrap();
        assert_eq!(model.n_steps(), 11);
        // Var(X_{t+1}) = alpha² tau2 + (1 - alpha²) tau2 = tau2.
        let next = 0.36 * model.sigma0[(0, 0)] + model.sigma[0][(0, 0)];
        assert_relative_eq!(next, 2.0, epsilon = 1e-12);
        // E[X_{t+1}] = alpha mu + (1 - alpha) mu = mu.
        assert_relative_eq!(0.6 * model.u[0][0] + model.u[1][0], 1.0, epsilon = 1e-12);
        assert!(ar1(0.0, 1.0, 1.0, 1.0, 3).is_err());
    }

    #[test]
    fn test_mv_ar1_keeps_full_covariance() {
        let tau = DMatrix::from_row_slice(2, 2, &[1.0, 0.4, 0.4, 2.0]);
        let model = mv_ar1(DVector::zeros(2), tau.clone(), 0.5, 0.1, 4).unwrap();
        assert_relative_eq!(model.sigma[0], 0.75 * &tau, epsilon = 1e-12);
        assert_eq!(model.obs_dim(), 2);
        // Cov(X_{t+1}) = alpha² tau + (1 - alpha²) tau = tau, off-diagonals included.
        let next = 0.25 * &model.sigma0 + &model.sigma[0];
        assert_relative_eq!(next, tau, epsilon = 1e-12);
    }

    #[test]
    fn test_mv_ar1_mean_stays_at_mu() {
        let mu = DVector::from_row_slice(&[1.0, -2.0]);
        let model = mv_ar1(mu.clone(), DMatrix::identity(2, 2), 0.3, 0.1, 5).unwrap();
        let mut mean = model.u[0].clone();
        for t in 0..5 {
            mean = &model.a[t] * mean + &model.u[t + 1];
            assert_relative_eq!(mean, mu, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_stsm_seasonal_sums_to_zero() {
        let s = 4;
        let model = stsm(DVector::zeros(6), 0.1, 0.01, 0.05, 5, DMatrix::identity(6, 6), 1.0, s).unwrap();
        assert_eq!(model.state_dim(), 6);
        assert_eq!(model.noise_dim(), 3);
        // Without noise, s + 1 consecutive seasonal effects sum to zero.
        let mut x = DVector::from_row_slice(&[0.0, 0.0, 1.0, -2.0, 0.5, 0.3]);
        let mut total = 0.0;
        for _ in 0..=s {
            x = &model.a[0] * x;
            total += x[2];
        }
        assert_relative_eq!(total, 0.0, epsilon = 1e-12);

        let trend_only = stsm(DVector::zeros(2), 0.1, 0.01, 0.0, 3, DMatrix::identity(2, 2), 1.0, 0).unwrap();
        assert_eq!(trend_only.state_dim(), 2);
    }

    #[test]
    fn test_pgssm_wrappers() {
        let glssm = locally_constant_model(3, 0.0, 1.0, 0.1, 1.0).unwrap();
        assert_eq!(poisson_pgssm(&glssm).unwrap().xi[2][0], 0.0);
        assert_eq!(negative_binomial_pgssm(&glssm, 5.0).unwrap().xi[0][0], 5.0);
        assert!(negative_binomial_pgssm(&glssm, 0.0).is_err());
    }
}
