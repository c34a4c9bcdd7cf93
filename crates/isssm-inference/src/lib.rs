//! # isssm-inference
//!
//! Inference for state space models with Gaussian states.
//!
//! This crate provides:
//! - Kalman filtering and smoothing (covariance and square-root forms)
//! - Disturbance / signal smoothing, FFBS and the simulation smoother
//! - Laplace approximation via mode estimation, importance sampling and
//!   weighted predictive summaries
//! - The cross-entropy method with a Markov-chain precision factorisation
//! - Maximum likelihood fitting of parameterised Gaussian models
//!
//! ## Conventions
//!
//! A model with `n` transitions has `n + 1` time steps. Time series are
//! `Vec<DVector<f64>>` indexed by time, sample batches are
//! `Vec<Vec<DVector<f64>>>` indexed by sample, then time. A `NaN` in the
//! observations marks a missing coordinate. Stochastic routines take an explicit
//! [`Key`](isssm_core::Key).

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Iteration settings, loadable from JSON.
pub mod config;
/// Cross-entropy method and the Markov precision Cholesky factor.
pub mod cross_entropy;
/// Disturbance and signal smoothing.
pub mod disturbance;
/// Forward-filter backward-sampling.
pub mod ffbs;
/// Importance weights, effective sample size and weighted predictions.
pub mod importance;
/// Kalman filter, RTS smoother and marginal intervals.
pub mod kalman;
/// Linear algebra helpers for possibly singular covariances.
pub mod linalg;
/// Maximum likelihood via L-BFGS.
pub mod mle;
/// Mode estimation (Laplace approximation).
pub mod mode;
/// Model records: GLSSM and PGSSM.
pub mod model;
/// Model factories.
pub mod models;
/// Simulation from the models.
pub mod simulate;
/// Durbin-Koopman simulation smoother with antithetics.
pub mod simulation_smoother;
/// Square-root Kalman filter.
pub mod sqrt_filter;

pub use config::{
    CrossEntropyConfig, InferenceConfig, MleConfig, ModeEstimationConfig, SimulationSmootherConfig,
};
pub use cross_entropy::{
    CrossEntropyResult, MarkovProcessCholesky, ce_cholesky_precision, ce_from_mode, ce_log_weights,
    cholesky_components,
};
pub use disturbance::{DisturbanceSmootherResult, disturbance_smoother, smoothed_signals};
pub use ffbs::{ffbs, simulate_smoothed};
pub use importance::{
    ImportanceSample, Prediction, ess, ess_pct, future_prediction_interval, laplace_importance_sampling,
    mc_integration, normalize_log_weights, predict, prediction, prediction_percentiles,
};
pub use kalman::{
    FilterResult, MarginalIntervals, SmootherResult, filter_intervals, kalman_filter, kalman_smoother,
    negative_log_likelihood, smoother_intervals, state_conditional_on_signal, state_mode,
};
pub use mle::{GlssmLikelihood, MleResult, fit_mle};
pub use mode::{ModeEstimate, initial_guess, mode_estimation, posterior_mode};
pub use model::{Glssm, Pgssm, StateEquation, account_for_nans};
pub use simulate::{sample_observations, simulate_glssm, simulate_pgssm, simulate_states};
pub use simulation_smoother::simulation_smoother;
pub use sqrt_filter::{SqrtFilterResult, sqrt_kalman_filter};
