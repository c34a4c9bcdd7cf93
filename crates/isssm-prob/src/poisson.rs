//! Poisson distribution with a log link.

use isssm_core::Result;

use crate::math::{check_count, exp_clamped, ln_factorial};

/// Log-PMF of `Pois(exp(log_rate))` at the count `k`.
pub fn logpmf_log_rate(k: f64, log_rate: f64) -> Result<f64> {
    check_count(k)?;
    Ok(k * log_rate - exp_clamped(log_rate) - ln_factorial(k))
}

/// `d/ds log p(k | s) = k - exp(s)`.
pub fn dlogpmf(k: f64, log_rate: f64) -> f64 {
    k - exp_clamped(log_rate)
}

/// `d²/ds² log p(k | s) = -exp(s)`.
pub fn d2logpmf(log_rate: f64) -> f64 {
    -exp_clamped(log_rate)
}
