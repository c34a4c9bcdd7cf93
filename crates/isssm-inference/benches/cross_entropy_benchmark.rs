use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use isssm_core::Key;
use isssm_inference::models::{ar1, poisson_pgssm};
use isssm_inference::{
    CrossEntropyConfig, ModeEstimationConfig, ce_from_mode, cholesky_components, mode_estimation,
    simulate_pgssm,
};
use nalgebra::DVector;
use std::hint::black_box;

fn bench_cholesky_components(c: &mut Criterion) {
    let mut group = c.benchmark_group("cholesky_components/ar1");
    for n in [50usize, 200] {
        let model = poisson_pgssm(&ar1(1.0, 0.5, 0.8, 1.0, n).unwrap()).unwrap();
        let (xs, _) = simulate_pgssm(&model, 1_000, Key::new(3)).unwrap();
        let weights = vec![1.0; xs.len()];
        group.bench_with_input(BenchmarkId::from_parameter(n), &xs, |b, xs| {
            b.iter(|| black_box(cholesky_components(black_box(xs), &weights).unwrap()))
        });
    }
    group.finish();
}

fn bench_poisson_pipeline(c: &mut Criterion) {
    let n = 100;
    let model = poisson_pgssm(&ar1(1.0, 0.5, 0.8, 1.0, n).unwrap()).unwrap();
    let (_, ys) = simulate_pgssm(&model, 1, Key::new(4)).unwrap();
    let y = &ys[0];
    let s_init = vec![DVector::zeros(1); n + 1];

    c.bench_function("mode_estimation/poisson_ar1_n=100", |b| {
        b.iter(|| black_box(mode_estimation(y, &model, &s_init, &ModeEstimationConfig::default()).unwrap()))
    });

    let mode = mode_estimation(y, &model, &s_init, &ModeEstimationConfig::default()).unwrap();
    let config = CrossEntropyConfig { n_iter: 3, n_samples: 500, eps: 1e-5 };
    let mut group = c.benchmark_group("cross_entropy/poisson_ar1_n=100");
    group.sample_size(10);
    group.bench_function("ce_from_mode_3x500", |b| {
        b.iter(|| black_box(ce_from_mode(y, &model, &mode, &config, Key::new(5)).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_cholesky_components, bench_poisson_pipeline);
criterion_main!(benches);
