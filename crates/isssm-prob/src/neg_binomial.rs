//! Negative binomial distribution with a log-mean signal.
//!
//! `Y | s ~ NB(r, p)` counting failures before `r` successes with
//! `p = r / (r + mu)`, `mu = exp(s)`, so that `E[Y] = mu` and
//! `Var(Y) = mu + mu^2 / r`.

use isssm_core::{Error, Result};
use statrs::function::gamma::ln_gamma;

use crate::math::{check_count, exp_clamped, ln_factorial};

fn check_size(r: f64) -> Result<()> {
    if !r.is_finite() || r <= 0.0 {
        return Err(Error::Validation(format!("size r must be finite and > 0, got {}", r)));
    }
    Ok(())
}

/// Log-PMF at `k` given log-mean `s` and size `r`.
pub fn logpmf_log_mean(k: f64, s: f64, r: f64) -> Result<f64> {
    check_count(k)?;
    check_size(r)?;
    let mu = exp_clamped(s);
    let ln_coeff = ln_gamma(k + r) - ln_gamma(r) - ln_factorial(k);
    // ln(r/(r+mu)) and ln(mu/(r+mu)) written via s to stay finite for tiny mu.
    let ln_r_mu = (r + mu).ln();
    Ok(ln_coeff + r * (r.ln() - ln_r_mu) + k * (s.clamp(-700.0, 700.0) - ln_r_mu))
}

/// `d/ds log p(k | s, r) = k - (k + r) mu / (r + mu)`.
pub fn dlogpmf(k: f64, s: f64, r: f64) -> Result<f64> {
    check_size(r)?;
    let mu = exp_clamped(s);
    Ok(k - (k + r) * mu / (r + mu))
}

/// `d²/ds² log p(k | s, r) = -(k + r) r mu / (r + mu)^2`.
pub fn d2logpmf(k: f64, s: f64, r: f64) -> Result<f64> {
    check_size(r)?;
    let mu = exp_clamped(s);
    let denom = r + mu;
    Ok(-(k + r) * r * mu / (denom * denom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_matches_r_p_form() {
        let (k, mu, r) = (3.0f64, 2.0f64, 2.0f64);
        let p = r / (r + mu);
        let reference =
            ln_gamma(k + r) - ln_gamma(r) - ln_factorial(k) + r * p.ln() + k * (1.0 - p).ln();
        let lp = logpmf_log_mean(k, mu.ln(), r).unwrap();
        assert_relative_eq!(lp, reference, epsilon = 1e-12);
    }

    #[test]
    fn test_derivatives_match_finite_differences() {
        let (k, s, r) = (4.0, 0.7, 3.5);
        let h = 1e-5;
        let fd = (logpmf_log_mean(k, s + h, r).unwrap() - logpmf_log_mean(k, s - h, r).unwrap())
            / (2.0 * h);
        assert_relative_eq!(dlogpmf(k, s, r).unwrap(), fd, epsilon = 1e-6);
        let fd2 = (dlogpmf(k, s + h, r).unwrap() - dlogpmf(k, s - h, r).unwrap()) / (2.0 * h);
        assert_relative_eq!(d2logpmf(k, s, r).unwrap(), fd2, epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_params() {
        assert!(logpmf_log_mean(1.0, 0.0, 0.0).is_err());
        assert!(logpmf_log_mean(-1.0, 0.0, 1.0).is_err());
        assert!(dlogpmf(1.0, 0.0, f64::INFINITY).is_err());
    }
}
