//! Weighted predictions from importance samples.

use approx::assert_relative_eq;
use isssm_core::Key;
use isssm_inference::models::{ar1, poisson_pgssm};
use isssm_inference::{
    ModeEstimationConfig, Pgssm, future_prediction_interval, kalman_filter, kalman_smoother,
    laplace_importance_sampling, posterior_mode, predict,
};
use isssm_prob::GaussianObservation;
use nalgebra::DVector;

fn series(values: &[f64]) -> Vec<DVector<f64>> {
    values.iter().map(|&v| DVector::from_element(1, v)).collect()
}

#[test]
fn test_gaussian_intervals_match_smoother_predictive() {
    let n = 7;
    let omega2 = 0.3;
    let glssm = ar1(0.5, 1.0, 0.7, omega2, n).unwrap();
    let model = Pgssm::from_glssm(&glssm, GaussianObservation, vec![DVector::from_element(1, omega2); n + 1])
        .unwrap();
    // The last two steps are forecasts.
    let y = series(&[0.8, 1.1, 0.4, f64::NAN, -0.2, 0.5, f64::NAN, f64::NAN]);
    let exact = kalman_smoother(&kalman_filter(&y, &glssm).unwrap(), &glssm.a).unwrap();

    let mode = posterior_mode(&y, &model, &ModeEstimationConfig::default()).unwrap();
    let is = laplace_importance_sampling(&y, &model, &mode.z, &mode.omega, 8000, Key::new(11)).unwrap();
    let probs = [0.025, 0.5, 0.975];
    let intervals = future_prediction_interval(&model, &is.samples, &is.log_weights, &probs, Key::new(12)).unwrap();
    assert_eq!(intervals.len(), n + 1);

    for t in 0..=n {
        let q = &intervals[t];
        assert_eq!((q.nrows(), q.ncols()), (1, 3));
        // Y'_t ~ N(x_smooth, P_t + omega2).
        let sd = (exact.xi_smooth[t][(0, 0)] + omega2).sqrt();
        let mu = exact.x_smooth[t][0];
        assert!((q[(0, 1)] - mu).abs() < 0.15 * sd, "t={} median={} mean={}", t, q[(0, 1)], mu);
        assert!((q[(0, 0)] - (mu - 1.96 * sd)).abs() < 0.2 * sd, "t={} lower={}", t, q[(0, 0)]);
        assert!((q[(0, 2)] - (mu + 1.96 * sd)).abs() < 0.2 * sd, "t={} upper={}", t, q[(0, 2)]);
    }
    // Forecast steps are at least as uncertain as the last observed one.
    let width = |t: usize| intervals[t][(0, 2)] - intervals[t][(0, 0)];
    assert!(width(n) > width(n - 2));
}

#[test]
fn test_predict_summarises_signal_functional() {
    let n = 5;
    let glssm = ar1(0.0, 1.0, 0.5, 0.5, n).unwrap();
    let model = Pgssm::from_glssm(&glssm, GaussianObservation, vec![DVector::from_element(1, 0.5); n + 1]).unwrap();
    let y = series(&[0.3, -0.4, 1.0, 0.2, f64::NAN, 0.6]);
    let exact = kalman_smoother(&kalman_filter(&y, &glssm).unwrap(), &glssm.a).unwrap();

    let mode = posterior_mode(&y, &model, &ModeEstimationConfig::default()).unwrap();
    let last_signal = move |_: &[DVector<f64>], s: &[DVector<f64>], _: &[DVector<f64>]| Ok(s[n].clone());
    let pred = predict(&y, &model, &mode, 5000, last_signal, &[0.5], Key::new(13)).unwrap();

    let sd = exact.xi_smooth[n][(0, 0)].sqrt();
    assert!((pred.mean[0] - exact.x_smooth[n][0]).abs() < 0.1 * sd);
    assert_relative_eq!(pred.sd[0], sd, epsilon = 0.1 * sd);
    assert!((pred.quantiles[(0, 0)] - exact.x_smooth[n][0]).abs() < 0.1 * sd);

    // Same key, same draws.
    let again = predict(&y, &model, &mode, 5000, last_signal, &[0.5], Key::new(13)).unwrap();
    assert_eq!(again.mean, pred.mean);
}

#[test]
fn test_poisson_forecast_intervals_are_counts() {
    let n = 12;
    let model = poisson_pgssm(&ar1(1.0, 0.5, 0.8, 1.0, n).unwrap()).unwrap();
    let mut values = vec![2.0, 4.0, 3.0, 1.0, 5.0, 2.0, 3.0, 6.0, 4.0, 2.0, 3.0];
    values.extend([f64::NAN; 2]);
    let y = series(&values);

    let mode = posterior_mode(&y, &model, &ModeEstimationConfig::default()).unwrap();
    assert!(mode.report.converged());
    let is = laplace_importance_sampling(&y, &model, &mode.z, &mode.omega, 2000, Key::new(14)).unwrap();
    let intervals =
        future_prediction_interval(&model, &is.samples, &is.log_weights, &[0.05, 0.5, 0.95], Key::new(15))
            .unwrap();
    for q in &intervals {
        assert!(q.iter().all(|v| *v >= 0.0 && v.fract() == 0.0));
        assert!(q[(0, 0)] <= q[(0, 1)] && q[(0, 1)] <= q[(0, 2)]);
    }
}
