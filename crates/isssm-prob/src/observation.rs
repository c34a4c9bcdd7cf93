//! [`ObservationDistribution`] implementations.

use isssm_core::{Error, ObservationDistribution, Result};
use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Poisson, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::math::exp_clamped;
use crate::{neg_binomial, normal, poisson};

/// `y | s ~ N(s, xi)`; `xi` is the observation variance.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GaussianObservation;

impl ObservationDistribution for GaussianObservation {
    fn name(&self) -> &str {
        "gaussian"
    }

    fn log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        normal::logpdf_var(y, signal, xi)
    }

    fn sample(&self, signal: f64, xi: f64, rng: &mut StdRng) -> Result<f64> {
        if !xi.is_finite() || xi < 0.0 {
            return Err(Error::Validation(format!("variance must be finite and >= 0, got {}", xi)));
        }
        let z: f64 = StandardNormal.sample(rng);
        Ok(signal + xi.sqrt() * z)
    }

    fn d_log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        normal::dlogpdf_dmu(y, signal, xi)
    }

    fn d2_log_prob(&self, _y: f64, _signal: f64, xi: f64) -> Result<f64> {
        normal::d2logpdf_dmu2(xi)
    }
}

/// `y | s ~ Pois(exp(s))`; `xi` is ignored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoissonObservation;

impl ObservationDistribution for PoissonObservation {
    fn name(&self) -> &str {
        "poisson"
    }

    fn log_prob(&self, y: f64, signal: f64, _xi: f64) -> Result<f64> {
        poisson::logpmf_log_rate(y, signal)
    }

    fn sample(&self, signal: f64, _xi: f64, rng: &mut StdRng) -> Result<f64> {
        sample_poisson(exp_clamped(signal), rng)
    }

    fn d_log_prob(&self, y: f64, signal: f64, _xi: f64) -> Result<f64> {
        Ok(poisson::dlogpmf(y, signal))
    }

    fn d2_log_prob(&self, _y: f64, signal: f64, _xi: f64) -> Result<f64> {
        Ok(poisson::d2logpmf(signal))
    }
}

/// `y | s ~ NB(mean = exp(s), size = xi)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NegativeBinomialObservation;

impl ObservationDistribution for NegativeBinomialObservation {
    fn name(&self) -> &str {
        "negative_binomial"
    }

    fn log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        neg_binomial::logpmf_log_mean(y, signal, xi)
    }

    /// Gamma–Poisson mixture: `lambda ~ Gamma(r, mu / r)`, `y ~ Pois(lambda)`.
    fn sample(&self, signal: f64, xi: f64, rng: &mut StdRng) -> Result<f64> {
        let mu = exp_clamped(signal);
        let gamma = Gamma::new(xi, mu / xi)
            .map_err(|e| Error::Validation(format!("invalid negative binomial size {}: {}", xi, e)))?;
        let lambda: f64 = gamma.sample(rng);
        sample_poisson(lambda, rng)
    }

    fn d_log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        neg_binomial::dlogpmf(y, signal, xi)
    }

    fn d2_log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        neg_binomial::d2logpmf(y, signal, xi)
    }
}

fn sample_poisson(lambda: f64, rng: &mut StdRng) -> Result<f64> {
    if lambda <= 0.0 {
        return Ok(0.0);
    }
    let dist = Poisson::new(lambda)
        .map_err(|e| Error::Computation(format!("cannot sample Poisson({}): {}", lambda, e)))?;
    Ok(dist.sample(rng))
}
