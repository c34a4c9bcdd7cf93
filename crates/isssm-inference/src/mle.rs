//! Maximum likelihood estimation for parameterised GLSSMs.
//!
//! The negative log-likelihood comes from the Kalman filter; the model is built
//! from the parameter vector by a caller-supplied closure. Minimisation uses
//! argmin's L-BFGS with a More-Thuente line search; bounds are enforced by
//! clamping, with a projected gradient at active bounds.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use isssm_core::{Error, Result};
use log::debug;
use nalgebra::DVector;

use crate::config::MleConfig;
use crate::kalman::negative_log_likelihood;
use crate::model::Glssm;

/// `θ -> -log p(y | θ)` for a family of Gaussian models.
pub struct GlssmLikelihood<'a, F>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    y: &'a [DVector<f64>],
    build: F,
}

impl<'a, F> GlssmLikelihood<'a, F>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    /// Objective for observations `y` and model builder `build`.
    pub fn new(y: &'a [DVector<f64>], build: F) -> Self {
        Self { y, build }
    }

    /// Negative log-likelihood at `theta`.
    pub fn nll(&self, theta: &[f64]) -> Result<f64> {
        let model = (self.build)(theta)?;
        negative_log_likelihood(self.y, &model)
    }

    /// Central-difference gradient of [`Self::nll`].
    pub fn gradient(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let mut grad = vec![0.0; theta.len()];
        for i in 0..theta.len() {
            let h = 1e-6 * theta[i].abs().max(1.0);
            let mut plus = theta.to_vec();
            plus[i] += h;
            let mut minus = theta.to_vec();
            minus[i] -= h;
            grad[i] = (self.nll(&plus)? - self.nll(&minus)?) / (2.0 * h);
        }
        Ok(grad)
    }
}

/// Result of [`fit_mle`].
#[derive(Debug, Clone)]
pub struct MleResult {
    /// Maximum likelihood estimate.
    pub theta: Vec<f64>,
    /// Negative log-likelihood at `theta`.
    pub nll: f64,
    /// L-BFGS iterations.
    pub n_iter: u64,
    /// Objective evaluations (gradient evaluations excluded).
    pub n_fev: usize,
    /// Gradient evaluations.
    pub n_gev: usize,
    /// Whether the solver reported convergence.
    pub converged: bool,
    /// Termination message from the solver.
    pub message: String,
}

impl fmt::Display for MleResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MleResult(nll={:.6}, n_iter={}, n_fev={}, n_gev={}, converged={})",
            self.nll, self.n_iter, self.n_fev, self.n_gev, self.converged
        )
    }
}

#[derive(Default)]
struct EvalCounts {
    cost: AtomicUsize,
    grad: AtomicUsize,
}

struct Problem<'o, 'a, F>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    objective: &'o GlssmLikelihood<'a, F>,
    bounds: &'o [(f64, f64)],
    counts: Arc<EvalCounts>,
}

fn clamp(theta: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    theta.iter().zip(bounds).map(|(&v, &(lo, hi))| v.clamp(lo, hi)).collect()
}

impl<F> CostFunction for Problem<'_, '_, F>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        self.counts.cost.fetch_add(1, Ordering::Relaxed);
        self.objective.nll(&clamp(theta, self.bounds)).map_err(|e| argmin::core::Error::msg(e.to_string()))
    }
}

impl<F> Gradient for Problem<'_, '_, F>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, theta: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
        self.counts.grad.fetch_add(1, Ordering::Relaxed);
        let clamped = clamp(theta, self.bounds);
        let mut g = self.objective.gradient(&clamped).map_err(|e| argmin::core::Error::msg(e.to_string()))?;

        // Zero components that push further outside an active bound.
        const EPS: f64 = 1e-12;
        for (i, (&x, &(lo, hi))) in clamped.iter().zip(self.bounds).enumerate() {
            if (x <= lo + EPS && g[i] > 0.0) || (x >= hi - EPS && g[i] < 0.0) {
                g[i] = 0.0;
            }
        }
        Ok(g)
    }
}

/// Minimise the negative log-likelihood from `theta0` within `bounds`.
pub fn fit_mle<F>(
    objective: &GlssmLikelihood<'_, F>,
    theta0: &[f64],
    bounds: &[(f64, f64)],
    config: &MleConfig,
) -> Result<MleResult>
where
    F: Fn(&[f64]) -> Result<Glssm> + Send + Sync,
{
    config.validate()?;
    if theta0.len() != bounds.len() {
        return Err(Error::Validation(format!(
            "parameter and bounds length mismatch: {} != {}",
            theta0.len(),
            bounds.len()
        )));
    }
    if bounds.iter().any(|(lo, hi)| lo.is_nan() || hi.is_nan() || lo > hi) {
        return Err(Error::Validation("every bound must satisfy lower <= upper".to_string()));
    }

    let init = clamp(theta0, bounds);
    let counts = Arc::new(EvalCounts::default());
    let problem = Problem { objective, bounds, counts: counts.clone() };

    let solver = LBFGS::new(MoreThuenteLineSearch::new(), config.m)
        .with_tolerance_grad(config.tol)
        .map_err(|e| Error::Validation(format!("invalid optimizer configuration (tol): {e}")))?
        .with_tolerance_cost((0.1 * config.tol).max(1e-12))
        .map_err(|e| Error::Validation(format!("invalid optimizer configuration (tol_cost): {e}")))?;

    let res = Executor::new(problem, solver)
        .configure(|state| state.param(init).max_iters(config.max_iter))
        .run()
        .map_err(|e| Error::Computation(format!("likelihood optimisation failed: {e}")))?;

    let state = res.state();
    let best = state
        .get_best_param()
        .ok_or_else(|| Error::Computation("optimizer returned no parameters".to_string()))?;
    let termination = state.get_termination_status();
    let converged = matches!(
        termination,
        TerminationStatus::Terminated(TerminationReason::SolverConverged)
            | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
    );
    let result = MleResult {
        theta: clamp(best, bounds),
        nll: state.get_best_cost(),
        n_iter: state.get_iter(),
        n_fev: counts.cost.load(Ordering::Relaxed),
        n_gev: counts.grad.load(Ordering::Relaxed),
        converged,
        message: termination.to_string(),
    };
    debug!("{}", result);
    Ok(result)
}
