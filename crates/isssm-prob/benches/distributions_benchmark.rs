use criterion::{Criterion, criterion_group, criterion_main};
use isssm_core::ObservationDistribution;
use isssm_prob::{GaussianObservation, NegativeBinomialObservation, PoissonObservation};
use std::hint::black_box;

fn bench_observation_log_probs(c: &mut Criterion) {
    let ks: Vec<f64> = (0..10_000).map(|i| (i % 30) as f64).collect();
    let ss: Vec<f64> = (0..10_000).map(|i| (i as f64) * 3e-4 - 1.0).collect();

    c.bench_function("gaussian_log_prob_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for (&k, &s) in ks.iter().zip(&ss) {
                acc += GaussianObservation.log_prob(k, s, 2.0).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("poisson_log_prob_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for (&k, &s) in ks.iter().zip(&ss) {
                acc += PoissonObservation.log_prob(k, s, 0.0).unwrap();
            }
            black_box(acc)
        })
    });

    c.bench_function("negative_binomial_hessian_10k", |b| {
        b.iter(|| {
            let mut acc = 0.0;
            for (&k, &s) in ks.iter().zip(&ss) {
                acc += NegativeBinomialObservation.d2_log_prob(k, s, 20.0).unwrap();
            }
            black_box(acc)
        })
    });
}

criterion_group!(benches, bench_observation_log_probs);
criterion_main!(benches);
