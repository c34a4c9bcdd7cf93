use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use isssm_core::Key;
use isssm_inference::models::{locally_constant_model, stsm};
use isssm_inference::{
    Glssm, SimulationSmootherConfig, ffbs, kalman_filter, kalman_smoother, simulation_smoother,
    smoothed_signals, sqrt_kalman_filter,
};
use nalgebra::{DMatrix, DVector};
use std::hint::black_box;

fn make_ys_1d(n: usize) -> Vec<DVector<f64>> {
    (0..=n)
        .map(|t| {
            // Deterministic signal so runs are stable across machines.
            let y = (t as f64 * 0.01).sin() + (t as f64 * 0.001).cos();
            DVector::from_row_slice(&[if t % 10 == 0 { f64::NAN } else { y }])
        })
        .collect()
}

fn seasonal(n: usize) -> Glssm {
    stsm(DVector::zeros(6), 0.1, 0.01, 0.05, n, DMatrix::identity(6, 6), 0.5, 4).unwrap()
}

fn bench_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("kalman_filter/local_level");
    for n in [100usize, 1_000, 10_000] {
        let model = locally_constant_model(n, 0.0, 1.0, 0.1, 0.2).unwrap();
        let ys = make_ys_1d(n);
        group.bench_with_input(BenchmarkId::new("covariance", n), &ys, |b, ys| {
            b.iter(|| black_box(kalman_filter(black_box(ys), &model).unwrap().log_likelihood))
        });
        group.bench_with_input(BenchmarkId::new("square_root", n), &ys, |b, ys| {
            b.iter(|| black_box(sqrt_kalman_filter(black_box(ys), &model).unwrap().log_likelihood))
        });
    }
    group.finish();

    let model = seasonal(1_000);
    let ys = make_ys_1d(1_000);
    c.bench_function("kalman_filter/stsm_m=6_n=1000", |b| {
        b.iter(|| black_box(kalman_filter(black_box(&ys), &model).unwrap().log_likelihood))
    });
}

fn bench_smoothers(c: &mut Criterion) {
    let n = 1_000;
    let model = seasonal(n);
    let ys = make_ys_1d(n);
    let fr = kalman_filter(&ys, &model).unwrap();

    c.bench_function("rts_smoother/stsm_m=6_n=1000", |b| {
        b.iter(|| black_box(kalman_smoother(black_box(&fr), &model.a).unwrap()))
    });
    c.bench_function("signal_smoother/stsm_m=6_n=1000", |b| {
        b.iter(|| black_box(smoothed_signals(black_box(&fr), &ys, &model).unwrap()))
    });
}

fn bench_samplers(c: &mut Criterion) {
    let n = 200;
    let model = locally_constant_model(n, 0.0, 1.0, 0.1, 0.2).unwrap();
    let ys = make_ys_1d(n);

    let mut group = c.benchmark_group("samplers/local_level_n=200");
    group.sample_size(20);
    group.bench_function("ffbs_100", |b| b.iter(|| black_box(ffbs(&ys, &model, 100, Key::new(1)).unwrap())));
    let cfg = SimulationSmootherConfig { n_samples: 25, antithetic: true };
    group.bench_function("simulation_smoother_25x4", |b| {
        b.iter(|| black_box(simulation_smoother(&model, &ys, &cfg, Key::new(1)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_filters, bench_smoothers, bench_samplers);
criterion_main!(benches);
