//! Small numerically-stable math utilities used across probability code.

use isssm_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

/// Exponential with a conservative clamp to avoid overflow.
///
/// Log-link count models evaluate `exp(s)` at arbitrary working signals; during the
/// first mode-estimation iterations `s` may be far from the data, and an `inf` mean
/// would poison the pseudo-observations with NaN.
#[inline]
pub fn exp_clamped(x: f64) -> f64 {
    x.clamp(-700.0, 700.0).exp()
}

/// `ln(k!)` for a non-negative integer-valued `k` stored as `f64`.
#[inline]
pub fn ln_factorial(k: f64) -> f64 {
    ln_gamma(k + 1.0)
}

/// Validate that `y` is a finite non-negative integer count.
pub fn check_count(y: f64) -> Result<()> {
    if !y.is_finite() || y < 0.0 || y.fract() != 0.0 {
        return Err(Error::Validation(format!(
            "count observation must be a finite non-negative integer, got {}",
            y
        )));
    }
    Ok(())
}
