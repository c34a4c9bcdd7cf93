//! Run configuration for the iterative and sampling procedures.
//!
//! Every struct deserializes with `#[serde(default)]`, so partial JSON documents
//! only need to name the fields they override.

use std::path::Path;

use isssm_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Settings of the Laplace mode iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeEstimationConfig {
    /// Maximum number of iterations (at least two are always run).
    pub n_iter: usize,
    /// Relative sup-norm tolerance on the pseudo-observations and variances.
    pub eps: f64,
}

impl Default for ModeEstimationConfig {
    fn default() -> Self {
        Self { n_iter: 100, eps: 1e-5 }
    }
}

impl ModeEstimationConfig {
    /// Validate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_iter == 0 {
            return Err(Error::Validation("mode.n_iter must be > 0".to_string()));
        }
        check_eps(self.eps, "mode.eps")
    }
}

/// Settings of the cross-entropy proposal fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossEntropyConfig {
    /// Maximum number of refits.
    pub n_iter: usize,
    /// Number of proposal draws per refit, and of the final batch.
    pub n_samples: usize,
    /// Relative sup-norm tolerance on the Cholesky blocks and the mean.
    pub eps: f64,
}

impl Default for CrossEntropyConfig {
    fn default() -> Self {
        Self { n_iter: 10, n_samples: 1000, eps: 1e-5 }
    }
}

impl CrossEntropyConfig {
    /// Validate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_iter == 0 {
            return Err(Error::Validation("cross_entropy.n_iter must be > 0".to_string()));
        }
        if self.n_samples < 2 {
            return Err(Error::Validation("cross_entropy.n_samples must be >= 2".to_string()));
        }
        check_eps(self.eps, "cross_entropy.eps")
    }
}

/// Settings of the Durbin–Koopman simulation smoother.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSmootherConfig {
    /// Number of base draws.
    pub n_samples: usize,
    /// Append location, scale and location-scale antithetics (4x the draws).
    pub antithetic: bool,
}

impl Default for SimulationSmootherConfig {
    fn default() -> Self {
        Self { n_samples: 100, antithetic: true }
    }
}

impl SimulationSmootherConfig {
    /// Validate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_samples == 0 {
            return Err(Error::Validation("simulation_smoother.n_samples must be > 0".to_string()));
        }
        Ok(())
    }

    /// Total number of returned draws.
    pub fn total_samples(&self) -> usize {
        if self.antithetic { 4 * self.n_samples } else { self.n_samples }
    }
}

/// L-BFGS settings for likelihood maximisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MleConfig {
    /// Maximum number of L-BFGS iterations.
    pub max_iter: u64,
    /// Gradient-norm tolerance (the cost tolerance is a tenth of it).
    pub tol: f64,
    /// History size.
    pub m: usize,
}

impl Default for MleConfig {
    fn default() -> Self {
        Self { max_iter: 1000, tol: 1e-6, m: 10 }
    }
}

impl MleConfig {
    /// Validate ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_iter == 0 {
            return Err(Error::Validation("mle.max_iter must be > 0".to_string()));
        }
        if self.m == 0 {
            return Err(Error::Validation("mle.m must be > 0".to_string()));
        }
        check_eps(self.tol, "mle.tol")
    }
}

/// Aggregate configuration, loadable from JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Mode iteration.
    pub mode: ModeEstimationConfig,
    /// Cross-entropy method.
    pub cross_entropy: CrossEntropyConfig,
    /// Simulation smoother.
    pub simulation_smoother: SimulationSmootherConfig,
    /// Likelihood maximisation.
    pub mle: MleConfig,
}

impl InferenceConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.mode.validate()?;
        self.cross_entropy.validate()?;
        self.simulation_smoother.validate()?;
        self.mle.validate()
    }
}

fn check_eps(eps: f64, name: &str) -> Result<()> {
    if !eps.is_finite() || eps <= 0.0 {
        return Err(Error::Validation(format!("{} must be finite and > 0", name)));
    }
    Ok(())
}
