//! Model records for Gaussian and partially Gaussian state space models.
//!
//! State:
//! `X_0 ~ N(u_0, Σ_0)`, `X_{t+1} = A_t X_t + u_{t+1} + D_t ε_{t+1}`, `ε_{t+1} ~ N(0, Σ_t)`
//!
//! Gaussian observation:
//! `Y_t = v_t + B_t X_t + η_t`, `η_t ~ N(0, Ω_t)`
//!
//! Partially Gaussian observation:
//! `Y_{t,i} | S_t ~ p(. | S_{t,i}, ξ_{t,i})` independently over `i`, with signal `S_t = B_t X_t`.
//!
//! Time runs over `0..=n`; `a`, `d` and `sigma` have one entry fewer than the
//! state and observation arrays.

use isssm_core::{Error, ObservationDistribution, Result};
use nalgebra::{DMatrix, DVector};

use crate::linalg::mvn_log_density;

/// Borrowed state-transition part shared by [`Glssm`] and [`Pgssm`].
#[derive(Debug, Clone, Copy)]
pub struct StateEquation<'a> {
    /// Offsets, `u[0]` is the initial mean.
    pub u: &'a [DVector<f64>],
    /// Transition matrices (m x m).
    pub a: &'a [DMatrix<f64>],
    /// Noise loadings (m x l).
    pub d: &'a [DMatrix<f64>],
    /// Initial covariance (m x m).
    pub sigma0: &'a DMatrix<f64>,
    /// Innovation covariances (l x l).
    pub sigma: &'a [DMatrix<f64>],
}

impl StateEquation<'_> {
    /// Number of time steps `n + 1`.
    pub fn n_steps(&self) -> usize {
        self.u.len()
    }

    /// State dimension `m`.
    pub fn state_dim(&self) -> usize {
        self.sigma0.nrows()
    }

    /// Covariance `D_t Σ_t D_tᵀ` of the state innovation entering step `t + 1`.
    pub fn innovation_cov(&self, t: usize) -> DMatrix<f64> {
        &self.d[t] * &self.sigma[t] * self.d[t].transpose()
    }

    /// Prior means `E[X_t]`.
    pub fn prior_means(&self) -> Vec<DVector<f64>> {
        let mut out = Vec::with_capacity(self.n_steps());
        out.push(self.u[0].clone());
        for t in 1..self.n_steps() {
            let next = &self.a[t - 1] * &out[t - 1] + &self.u[t];
            out.push(next);
        }
        out
    }

    /// Per-step log-densities of a state path: `log p(x_0)`, then `log p(x_t | x_{t-1})`.
    pub fn log_probs_x(&self, x: &[DVector<f64>]) -> Result<Vec<f64>> {
        if x.len() != self.n_steps() {
            return Err(Error::Validation(format!(
                "state path has {} steps, model has {}",
                x.len(),
                self.n_steps()
            )));
        }
        let mut out = Vec::with_capacity(x.len());
        out.push(mvn_log_density(&x[0], &self.u[0], self.sigma0)?);
        for t in 1..x.len() {
            let mean = &self.a[t - 1] * &x[t - 1] + &self.u[t];
            out.push(mvn_log_density(&x[t], &mean, &self.innovation_cov(t - 1))?);
        }
        Ok(out)
    }
}

fn all_finite<'a>(mut it: impl Iterator<Item = &'a f64>) -> bool {
    it.all(|v| v.is_finite())
}

/// Validate the state part and return `(m, l)`.
fn validate_state(
    u: &[DVector<f64>],
    a: &[DMatrix<f64>],
    d: &[DMatrix<f64>],
    sigma0: &DMatrix<f64>,
    sigma: &[DMatrix<f64>],
) -> Result<(usize, usize)> {
    let np1 = u.len();
    if np1 == 0 {
        return Err(Error::Validation("u must have at least one time step".to_string()));
    }
    let n = np1 - 1;
    if a.len() != n || d.len() != n || sigma.len() != n {
        return Err(Error::Validation(format!(
            "A, D and Sigma must have n={} entries, got {}, {}, {}",
            n,
            a.len(),
            d.len(),
            sigma.len()
        )));
    }
    let m = sigma0.nrows();
    if m == 0 || sigma0.ncols() != m {
        return Err(Error::Validation("Sigma0 must be square with m>0".to_string()));
    }
    if u.iter().any(|ut| ut.len() != m) {
        return Err(Error::Validation("u entries must have length m".to_string()));
    }
    if a.iter().any(|at| at.nrows() != m || at.ncols() != m) {
        return Err(Error::Validation("A entries must be m x m".to_string()));
    }
    let l = d.first().map_or(0, |d0| d0.ncols());
    if d.iter().any(|dt| dt.nrows() != m || dt.ncols() != l) {
        return Err(Error::Validation("D entries must be m x l with a common l".to_string()));
    }
    if sigma.iter().any(|s| s.nrows() != l || s.ncols() != l) {
        return Err(Error::Validation("Sigma entries must be l x l".to_string()));
    }
    if !all_finite(sigma0.iter())
        || !u.iter().all(|x| all_finite(x.iter()))
        || !a.iter().all(|x| all_finite(x.iter()))
        || !d.iter().all(|x| all_finite(x.iter()))
        || !sigma.iter().all(|x| all_finite(x.iter()))
    {
        return Err(Error::Validation("state model matrices/vectors must be finite".to_string()));
    }
    Ok((m, l))
}

/// Validate signal matrices against `n_steps` and `m`, return `p`.
fn validate_signal(b: &[DMatrix<f64>], n_steps: usize, m: usize) -> Result<usize> {
    if b.len() != n_steps {
        return Err(Error::Validation(format!(
            "B must have n+1={} entries, got {}",
            n_steps,
            b.len()
        )));
    }
    let p = b[0].nrows();
    if p == 0 || b.iter().any(|bt| bt.nrows() != p || bt.ncols() != m) {
        return Err(Error::Validation("B entries must be p x m with p>0".to_string()));
    }
    if !b.iter().all(|x| all_finite(x.iter())) {
        return Err(Error::Validation("B must be finite".to_string()));
    }
    Ok(p)
}

/// Indices of the non-NaN coordinates of an observation.
pub fn observed_indices(y: &DVector<f64>) -> Vec<usize> {
    y.iter().enumerate().filter(|(_, v)| !v.is_nan()).map(|(i, _)| i).collect()
}

/// Check that a series has `n_steps` entries of length `p` and no infinities.
pub(crate) fn validate_series(y: &[DVector<f64>], n_steps: usize, p: usize, what: &str) -> Result<()> {
    if y.len() != n_steps {
        return Err(Error::Validation(format!(
            "{} has {} steps, model has {}",
            what,
            y.len(),
            n_steps
        )));
    }
    if y.iter().any(|yt| yt.len() != p) {
        return Err(Error::Validation(format!("{} entries must have length {}", what, p)));
    }
    if y.iter().any(|yt| yt.iter().any(|v| v.is_infinite())) {
        return Err(Error::Validation(format!("{} must not contain infinities", what)));
    }
    Ok(())
}

/// Linear Gaussian state space model.
#[derive(Debug, Clone)]
pub struct Glssm {
    /// State offsets (n+1, m). `u[0]` is the initial mean.
    pub u: Vec<DVector<f64>>,
    /// Transition matrices (n, m x m).
    pub a: Vec<DMatrix<f64>>,
    /// Noise loadings (n, m x l).
    pub d: Vec<DMatrix<f64>>,
    /// Initial state covariance (m x m).
    pub sigma0: DMatrix<f64>,
    /// Innovation covariances (n, l x l).
    pub sigma: Vec<DMatrix<f64>>,
    /// Observation offsets (n+1, p).
    pub v: Vec<DVector<f64>>,
    /// Signal matrices (n+1, p x m).
    pub b: Vec<DMatrix<f64>>,
    /// Observation covariances (n+1, p x p), possibly singular.
    pub omega: Vec<DMatrix<f64>>,
}

impl Glssm {
    /// Create a model and validate dimensions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        u: Vec<DVector<f64>>,
        a: Vec<DMatrix<f64>>,
        d: Vec<DMatrix<f64>>,
        sigma0: DMatrix<f64>,
        sigma: Vec<DMatrix<f64>>,
        v: Vec<DVector<f64>>,
        b: Vec<DMatrix<f64>>,
        omega: Vec<DMatrix<f64>>,
    ) -> Result<Self> {
        let (m, _) = validate_state(&u, &a, &d, &sigma0, &sigma)?;
        let p = validate_signal(&b, u.len(), m)?;
        if v.len() != u.len() || v.iter().any(|vt| vt.len() != p) {
            return Err(Error::Validation("v must have n+1 entries of length p".to_string()));
        }
        if omega.len() != u.len() || omega.iter().any(|o| o.nrows() != p || o.ncols() != p) {
            return Err(Error::Validation("Omega must have n+1 entries of shape p x p".to_string()));
        }
        if !v.iter().all(|x| all_finite(x.iter())) || !omega.iter().all(|x| all_finite(x.iter())) {
            return Err(Error::Validation("v and Omega must be finite".to_string()));
        }
        Ok(Self { u, a, d, sigma0, sigma, v, b, omega })
    }

    /// Model with `D = I`, `u = (x0, 0, ..., 0)` and `v = 0`.
    pub fn from_parts(
        x0: DVector<f64>,
        a: Vec<DMatrix<f64>>,
        sigma0: DMatrix<f64>,
        sigma: Vec<DMatrix<f64>>,
        b: Vec<DMatrix<f64>>,
        omega: Vec<DMatrix<f64>>,
    ) -> Result<Self> {
        let m = x0.len();
        let n = a.len();
        let p = b.first().map_or(0, |b0| b0.nrows());
        let mut u = vec![DVector::zeros(m); n + 1];
        u[0] = x0;
        Self::new(
            u,
            a,
            vec![DMatrix::identity(m, m); n],
            sigma0,
            sigma,
            vec![DVector::zeros(p); n + 1],
            b,
            omega,
        )
    }

    /// Number of time steps `n + 1`.
    pub fn n_steps(&self) -> usize {
        self.u.len()
    }

    /// State dimension `m`.
    pub fn state_dim(&self) -> usize {
        self.sigma0.nrows()
    }

    /// Observation dimension `p`.
    pub fn obs_dim(&self) -> usize {
        self.b[0].nrows()
    }

    /// Innovation dimension `l`.
    pub fn noise_dim(&self) -> usize {
        self.d.first().map_or(0, |d0| d0.ncols())
    }

    /// Initial state mean.
    pub fn x0(&self) -> &DVector<f64> {
        &self.u[0]
    }

    /// Borrow the state-transition part.
    pub fn state(&self) -> StateEquation<'_> {
        StateEquation { u: &self.u, a: &self.a, d: &self.d, sigma0: &self.sigma0, sigma: &self.sigma }
    }

    /// Same model with observation covariances replaced.
    pub fn with_omega(&self, omega: Vec<DMatrix<f64>>) -> Result<Self> {
        Self::new(
            self.u.clone(),
            self.a.clone(),
            self.d.clone(),
            self.sigma0.clone(),
            self.sigma.clone(),
            self.v.clone(),
            self.b.clone(),
            omega,
        )
    }

    /// Same model observing the signal `v + B x` without noise.
    pub fn signal_model(&self) -> Self {
        let p = self.obs_dim();
        Self { omega: vec![DMatrix::zeros(p, p); self.n_steps()], ..self.clone() }
    }

    /// Per-step observation log-densities `log p(y_t | x_t)` over the observed coordinates.
    pub fn log_probs_y(&self, x: &[DVector<f64>], y: &[DVector<f64>]) -> Result<Vec<f64>> {
        validate_series(y, self.n_steps(), self.obs_dim(), "y")?;
        validate_series(x, self.n_steps(), self.state_dim(), "x")?;
        (0..self.n_steps())
            .map(|t| {
                let idx = observed_indices(&y[t]);
                if idx.is_empty() {
                    return Ok(0.0);
                }
                let mean = &self.v[t] + &self.b[t] * &x[t];
                let cov = self.omega[t].select_rows(idx.iter()).select_columns(idx.iter());
                mvn_log_density(&y[t].select_rows(idx.iter()), &mean.select_rows(idx.iter()), &cov)
            })
            .collect()
    }

    /// Joint log-density `log p(x, y)`.
    pub fn log_prob(&self, x: &[DVector<f64>], y: &[DVector<f64>]) -> Result<f64> {
        let px: f64 = self.state().log_probs_x(x)?.iter().sum();
        let py: f64 = self.log_probs_y(x, y)?.iter().sum();
        Ok(px + py)
    }
}

/// Drop missing (NaN) observation coordinates without changing shapes.
///
/// Every NaN in `y` is set to zero, together with the matching entry of `v`, the
/// matching row of `B` and the matching row and column of `Ω`. The returned pair
/// is what all filter entry points actually run on.
pub fn account_for_nans(model: &Glssm, y: &[DVector<f64>]) -> Result<(Glssm, Vec<DVector<f64>>)> {
    validate_series(y, model.n_steps(), model.obs_dim(), "y")?;
    let mut cleaned = model.clone();
    let mut y_clean = y.to_vec();
    for t in 0..model.n_steps() {
        for i in 0..model.obs_dim() {
            if y[t][i].is_nan() {
                y_clean[t][i] = 0.0;
                cleaned.v[t][i] = 0.0;
                cleaned.b[t].row_mut(i).fill(0.0);
                cleaned.omega[t].row_mut(i).fill(0.0);
                cleaned.omega[t].column_mut(i).fill(0.0);
            }
        }
    }
    Ok((cleaned, y_clean))
}

/// State space model with Gaussian states and a non-Gaussian observation layer.
#[derive(Debug, Clone)]
pub struct Pgssm<D> {
    /// State offsets (n+1, m). `u[0]` is the initial mean.
    pub u: Vec<DVector<f64>>,
    /// Transition matrices (n, m x m).
    pub a: Vec<DMatrix<f64>>,
    /// Noise loadings (n, m x l).
    pub d: Vec<DMatrix<f64>>,
    /// Initial state covariance (m x m).
    pub sigma0: DMatrix<f64>,
    /// Innovation covariances (n, l x l).
    pub sigma: Vec<DMatrix<f64>>,
    /// Signal matrices (n+1, p x m).
    pub b: Vec<DMatrix<f64>>,
    /// Observation family.
    pub dist: D,
    /// Per-coordinate family parameters (n+1, p).
    pub xi: Vec<DVector<f64>>,
}

impl<D: ObservationDistribution> Pgssm<D> {
    /// Create a model and validate dimensions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        u: Vec<DVector<f64>>,
        a: Vec<DMatrix<f64>>,
        d: Vec<DMatrix<f64>>,
        sigma0: DMatrix<f64>,
        sigma: Vec<DMatrix<f64>>,
        b: Vec<DMatrix<f64>>,
        dist: D,
        xi: Vec<DVector<f64>>,
    ) -> Result<Self> {
        let (m, _) = validate_state(&u, &a, &d, &sigma0, &sigma)?;
        let p = validate_signal(&b, u.len(), m)?;
        if xi.len() != u.len() || xi.iter().any(|x| x.len() != p) {
            return Err(Error::Validation("xi must have n+1 entries of length p".to_string()));
        }
        if !xi.iter().all(|x| all_finite(x.iter())) {
            return Err(Error::Validation("xi must be finite".to_string()));
        }
        Ok(Self { u, a, d, sigma0, sigma, b, dist, xi })
    }

    /// Take the state equation and signal matrices of `glssm`, ignoring its `v` and `Ω`.
    pub fn from_glssm(glssm: &Glssm, dist: D, xi: Vec<DVector<f64>>) -> Result<Self> {
        Self::new(
            glssm.u.clone(),
            glssm.a.clone(),
            glssm.d.clone(),
            glssm.sigma0.clone(),
            glssm.sigma.clone(),
            glssm.b.clone(),
            dist,
            xi,
        )
    }

    /// Number of time steps `n + 1`.
    pub fn n_steps(&self) -> usize {
        self.u.len()
    }

    /// State dimension `m`.
    pub fn state_dim(&self) -> usize {
        self.sigma0.nrows()
    }

    /// Observation dimension `p`.
    pub fn obs_dim(&self) -> usize {
        self.b[0].nrows()
    }

    /// Borrow the state-transition part.
    pub fn state(&self) -> StateEquation<'_> {
        StateEquation { u: &self.u, a: &self.a, d: &self.d, sigma0: &self.sigma0, sigma: &self.sigma }
    }

    /// Gaussian model with the same states and pseudo-observation covariances `omega`.
    pub fn to_glssm(&self, omega: Vec<DMatrix<f64>>) -> Result<Glssm> {
        Glssm::new(
            self.u.clone(),
            self.a.clone(),
            self.d.clone(),
            self.sigma0.clone(),
            self.sigma.clone(),
            vec![DVector::zeros(self.obs_dim()); self.n_steps()],
            self.b.clone(),
            omega,
        )
    }

    /// Signals `B_t x_t` of a state path.
    pub fn signals(&self, x: &[DVector<f64>]) -> Vec<DVector<f64>> {
        crate::linalg::mm_time(&self.b, x)
    }

    /// `Σ_i log p(y_{t,i} | s_{t,i})` per step, skipping missing coordinates.
    pub fn log_probs_y_given_signal(&self, s: &[DVector<f64>], y: &[DVector<f64>]) -> Result<Vec<f64>> {
        validate_series(y, self.n_steps(), self.obs_dim(), "y")?;
        validate_series(s, self.n_steps(), self.obs_dim(), "signal")?;
        (0..self.n_steps())
            .map(|t| {
                let mut acc = 0.0;
                for i in 0..self.obs_dim() {
                    if !y[t][i].is_nan() {
                        acc += self.dist.log_prob(y[t][i], s[t][i], self.xi[t][i])?;
                    }
                }
                Ok(acc)
            })
            .collect()
    }

    /// Per-step observation log-densities for a state path.
    pub fn log_probs_y(&self, x: &[DVector<f64>], y: &[DVector<f64>]) -> Result<Vec<f64>> {
        validate_series(x, self.n_steps(), self.state_dim(), "x")?;
        self.log_probs_y_given_signal(&self.signals(x), y)
    }

    /// Joint log-density `log p(x, y)`.
    pub fn log_prob(&self, x: &[DVector<f64>], y: &[DVector<f64>]) -> Result<f64> {
        let px: f64 = self.state().log_probs_x(x)?.iter().sum();
        let py: f64 = self.log_probs_y(x, y)?.iter().sum();
        Ok(px + py)
    }
}
