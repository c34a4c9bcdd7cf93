//! Durbin–Koopman simulation smoother for the signal `v_t + B_t X_t`.
//!
//! Each draw simulates an independent series `(X⁺, Y⁺)` from the model, smooths
//! it with the same linear smoother and returns
//! `ŝ(y) + (s⁺ - ŝ(y⁺))`. Location and scale antithetics are built from the same
//! standard normals.

use isssm_core::{Error, Key, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};

use crate::config::SimulationSmootherConfig;
use crate::disturbance::smoothed_signals;
use crate::kalman::kalman_filter;
use crate::linalg::{degenerate_cholesky, standard_normal};
use crate::model::Glssm;

struct Roots {
    initial: DMatrix<f64>,
    innovation: Vec<DMatrix<f64>>,
    observation: Vec<DMatrix<f64>>,
}

/// One base draw and the squared norm of all standard normals behind it.
fn replicate(
    model: &Glssm,
    y: &[DVector<f64>],
    roots: &Roots,
    signal_smooth: &[DVector<f64>],
    key: Key,
) -> Result<(Vec<DVector<f64>>, f64)> {
    let mut rng = key.rng();
    let (m, l, p) = (model.state_dim(), model.noise_dim(), model.obs_dim());

    let u_x0 = standard_normal(m, &mut rng);
    let mut chi2 = u_x0.norm_squared();
    let mut x = &model.u[0] + &roots.initial * u_x0;

    let mut sim_signal = Vec::with_capacity(model.n_steps());
    let mut y_sim = Vec::with_capacity(model.n_steps());
    for t in 0..model.n_steps() {
        if t > 0 {
            let u_eps = standard_normal(l, &mut rng);
            chi2 += u_eps.norm_squared();
            let innovation = &model.d[t - 1] * (&roots.innovation[t - 1] * u_eps);
            x = &model.a[t - 1] * &x + &model.u[t] + innovation;
        }
        let u_eta = standard_normal(p, &mut rng);
        chi2 += u_eta.norm_squared();
        let s = &model.v[t] + &model.b[t] * &x;
        let mut yt = &s + &roots.observation[t] * u_eta;
        // Same missingness pattern as the data.
        for i in 0..p {
            if y[t][i].is_nan() {
                yt[i] = f64::NAN;
            }
        }
        sim_signal.push(s);
        y_sim.push(yt);
    }

    let filtered = kalman_filter(&y_sim, model)?;
    let sim_smooth = smoothed_signals(&filtered, &y_sim, model)?;
    let sample = (0..model.n_steps())
        .map(|t| &signal_smooth[t] + &sim_signal[t] - &sim_smooth[t])
        .collect();
    Ok((sample, chi2))
}

/// Reflect every draw about the conditional mean: `2 ŝ - s`.
pub fn location_antithetic(
    samples: &[Vec<DVector<f64>>],
    mean: &[DVector<f64>],
) -> Vec<Vec<DVector<f64>>> {
    samples
        .iter()
        .map(|s| s.iter().zip(mean).map(|(st, mt)| 2.0 * mt - st).collect())
        .collect()
}

/// Rescale every draw about the mean so that its chi-square statistic maps to the
/// opposite tail: `ŝ + sqrt(c'/c) (s - ŝ)` with `F(c') = 1 - F(c)`, `F` the
/// `χ²_dim` CDF.
pub fn scale_antithetic(
    samples: &[Vec<DVector<f64>>],
    chi2: &[f64],
    dim: usize,
    mean: &[DVector<f64>],
) -> Result<Vec<Vec<DVector<f64>>>> {
    let dist = ChiSquared::new(dim as f64)
        .map_err(|e| Error::Computation(format!("failed to construct chi-square distribution: {e}")))?;
    Ok(samples
        .iter()
        .zip(chi2)
        .map(|(s, &c)| {
            let c_mirror = dist.inverse_cdf(1.0 - dist.cdf(c));
            let factor = (c_mirror / c).sqrt();
            s.iter().zip(mean).map(|(st, mt)| mt + factor * (st - mt)).collect()
        })
        .collect())
}

/// Draw from the smoothing distribution of the signal.
///
/// With `config.antithetic` the result holds `4 * n_samples` draws ordered as
/// `[base, location, scale, location-scale]`; otherwise the `n_samples` base draws.
pub fn simulation_smoother(
    model: &Glssm,
    y: &[DVector<f64>],
    config: &SimulationSmootherConfig,
    key: Key,
) -> Result<Vec<Vec<DVector<f64>>>> {
    config.validate()?;
    let filtered = kalman_filter(y, model)?;
    let signal_smooth = smoothed_signals(&filtered, y, model)?;

    let roots = Roots {
        initial: degenerate_cholesky(&model.sigma0)?,
        innovation: model.sigma.iter().map(degenerate_cholesky).collect::<Result<Vec<_>>>()?,
        observation: model.omega.iter().map(degenerate_cholesky).collect::<Result<Vec<_>>>()?,
    };

    let draws = key
        .split_n(config.n_samples)
        .into_par_iter()
        .map(|k| replicate(model, y, &roots, &signal_smooth, k))
        .collect::<Result<Vec<_>>>()?;
    let (base, chi2): (Vec<_>, Vec<_>) = draws.into_iter().unzip();

    if !config.antithetic {
        return Ok(base);
    }

    let n = model.n_steps() - 1;
    let dim = model.state_dim() + n * model.noise_dim() + (n + 1) * model.obs_dim();
    let location = location_antithetic(&base, &signal_smooth);
    let scale = scale_antithetic(&base, &chi2, dim, &signal_smooth)?;
    let location_scale = location_antithetic(&scale, &signal_smooth);

    let mut out = base;
    out.extend(location);
    out.extend(scale);
    out.extend(location_scale);
    Ok(out)
}
