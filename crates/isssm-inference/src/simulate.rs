//! Draws from the prior of a state space model.

use isssm_core::{Key, ObservationDistribution, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::linalg::{degenerate_cholesky, standard_normal};
use crate::model::{Glssm, Pgssm, StateEquation};

/// Lower-triangular roots of the initial covariance and of each `D_t Σ_t D_tᵀ`.
fn state_roots(state: &StateEquation<'_>) -> Result<(DMatrix<f64>, Vec<DMatrix<f64>>)> {
    let root0 = degenerate_cholesky(state.sigma0)?;
    let roots = (0..state.a.len())
        .map(|t| degenerate_cholesky(&state.innovation_cov(t)))
        .collect::<Result<Vec<_>>>()?;
    Ok((root0, roots))
}

fn draw_path(
    state: &StateEquation<'_>,
    root0: &DMatrix<f64>,
    roots: &[DMatrix<f64>],
    key: Key,
) -> Vec<DVector<f64>> {
    let m = state.state_dim();
    let mut rng = key.rng();
    let mut path = Vec::with_capacity(state.n_steps());
    path.push(&state.u[0] + root0 * standard_normal(m, &mut rng));
    for t in 0..state.a.len() {
        let next = &state.a[t] * &path[t] + &state.u[t + 1] + &roots[t] * standard_normal(m, &mut rng);
        path.push(next);
    }
    path
}

/// `n` independent state paths from the prior.
pub fn simulate_states(state: &StateEquation<'_>, n: usize, key: Key) -> Result<Vec<Vec<DVector<f64>>>> {
    let (root0, roots) = state_roots(state)?;
    Ok(key
        .split_n(n)
        .into_par_iter()
        .map(|k| draw_path(state, &root0, &roots, k))
        .collect())
}

/// `n` joint draws `(states, observations)` from a Gaussian model.
pub fn simulate_glssm(
    model: &Glssm,
    n: usize,
    key: Key,
) -> Result<(Vec<Vec<DVector<f64>>>, Vec<Vec<DVector<f64>>>)> {
    let (key_x, key_y) = key.split();
    let xs = simulate_states(&model.state(), n, key_x)?;
    let obs_roots = model.omega.iter().map(degenerate_cholesky).collect::<Result<Vec<_>>>()?;
    let p = model.obs_dim();
    let ys = xs
        .par_iter()
        .zip(key_y.split_n(n))
        .map(|(x, k)| {
            let mut rng = k.rng();
            x.iter()
                .enumerate()
                .map(|(t, xt)| &model.v[t] + &model.b[t] * xt + &obs_roots[t] * standard_normal(p, &mut rng))
                .collect::<Vec<_>>()
        })
        .collect();
    Ok((xs, ys))
}

/// `n` joint draws `(states, observations)` from a partially Gaussian model.
pub fn simulate_pgssm<D: ObservationDistribution>(
    model: &Pgssm<D>,
    n: usize,
    key: Key,
) -> Result<(Vec<Vec<DVector<f64>>>, Vec<Vec<DVector<f64>>>)> {
    let (key_x, key_y) = key.split();
    let xs = simulate_states(&model.state(), n, key_x)?;
    let ys = xs
        .par_iter()
        .zip(key_y.split_n(n))
        .map(|(x, k)| sample_observations(model, x, k))
        .collect::<Result<Vec<_>>>()?;
    Ok((xs, ys))
}

/// Draw `Y_t | X_t = x_t` for every step of one state path.
pub fn sample_observations<D: ObservationDistribution>(
    model: &Pgssm<D>,
    x: &[DVector<f64>],
    key: Key,
) -> Result<Vec<DVector<f64>>> {
    let mut rng = key.rng();
    model
        .signals(x)
        .iter()
        .zip(&model.xi)
        .map(|(s, xi)| -> Result<DVector<f64>> {
            let draws = s
                .iter()
                .zip(xi.iter())
                .map(|(&si, &xii)| model.dist.sample(si, xii, &mut rng))
                .collect::<Result<Vec<f64>>>()?;
            Ok(DVector::from_vec(draws))
        })
        .collect()
}
