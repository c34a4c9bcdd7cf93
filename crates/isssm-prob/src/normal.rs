//! Normal distribution utilities (variance parameterisation).

use isssm_core::{Error, Result};

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

fn check_variance(var: f64) -> Result<()> {
    if !var.is_finite() || var <= 0.0 {
        return Err(Error::Validation(format!("variance must be finite and > 0, got {}", var)));
    }
    Ok(())
}

/// Log-PDF of `N(mu, var)` at `x`.
pub fn logpdf_var(x: f64, mu: f64, var: f64) -> Result<f64> {
    check_variance(var)?;
    let d = x - mu;
    Ok(-0.5 * d * d / var - 0.5 * var.ln() - LN_SQRT_2PI)
}

/// `d/dmu log N(x; mu, var)`.
pub fn dlogpdf_dmu(x: f64, mu: f64, var: f64) -> Result<f64> {
    check_variance(var)?;
    Ok((x - mu) / var)
}

/// `d²/dmu² log N(x; mu, var)`.
pub fn d2logpdf_dmu2(var: f64) -> Result<f64> {
    check_variance(var)?;
    Ok(-1.0 / var)
}
