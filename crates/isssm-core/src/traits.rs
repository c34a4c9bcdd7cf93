//! Core traits for isssm
//!
//! The observation layer is the only place where Gaussian and non-Gaussian
//! state space models differ. Inference code is written against
//! [`ObservationDistribution`] and never against a concrete family.

use rand::rngs::StdRng;

use crate::Result;

/// Conditional distribution of a single observation coordinate given its signal.
///
/// `xi` is the per-coordinate distribution parameter (variance, dispersion, ...).
/// Coordinates are conditionally independent given the signal, so joint
/// log-densities are sums over coordinates and the Hessian in the signal is diagonal.
pub trait ObservationDistribution: Send + Sync {
    /// Family name (e.g. "poisson").
    fn name(&self) -> &str;

    /// `log p(y | signal, xi)`.
    fn log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64>;

    /// Draw `y ~ p(. | signal, xi)`.
    fn sample(&self, signal: f64, xi: f64, rng: &mut StdRng) -> Result<f64>;

    /// First derivative of `log_prob` in the signal (numerical if not overridden).
    fn d_log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        let h = 1e-5 * signal.abs().max(1.0);
        let f_plus = self.log_prob(y, signal + h, xi)?;
        let f_minus = self.log_prob(y, signal - h, xi)?;
        Ok((f_plus - f_minus) / (2.0 * h))
    }

    /// Second derivative of `log_prob` in the signal (numerical if not overridden).
    fn d2_log_prob(&self, y: f64, signal: f64, xi: f64) -> Result<f64> {
        let h = 1e-4 * signal.abs().max(1.0);
        let g_plus = self.d_log_prob(y, signal + h, xi)?;
        let g_minus = self.d_log_prob(y, signal - h, xi)?;
        Ok((g_plus - g_minus) / (2.0 * h))
    }
}
