use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal};
use solvermux::{HybridLinUcb, HybridLinUcbConfig, RankOrder};

fn synthetic_features(rng: &mut StdRng, dim: usize, n: usize) -> Vec<Vec<f64>> {
    // Probe readings are heavy-tailed in practice; log-normal then squash.
    let dist = LogNormal::new(0.0, 1.0).unwrap();
    (0..n)
        .map(|_| {
            (0..dim)
                .map(|_| {
                    let v: f64 = dist.sample(rng);
                    v / (1.0 + v)
                })
                .collect()
        })
        .collect()
}

fn trained_policy(dim: usize, k: usize, rounds: usize) -> (HybridLinUcb, Vec<Vec<f64>>) {
    let mut rng = StdRng::seed_from_u64(42);
    let xs = synthetic_features(&mut rng, dim, rounds.max(64));
    let mut p = HybridLinUcb::new(
        HybridLinUcbConfig {
            dim,
            alpha: 2.358,
            seed: 7,
            rank_order: RankOrder::LowestFirst,
        },
        k,
    )
    .unwrap();
    for (t, x) in xs.iter().take(rounds).enumerate() {
        p.update(t % k, x, ((t * 13) % 100) as f64 / 100.0).unwrap();
    }
    (p, xs)
}

fn bench_rank(c: &mut Criterion) {
    let mut group = c.benchmark_group("rank");
    for &(dim, k) in &[(4usize, 4usize), (11, 4), (11, 8)] {
        let (p, xs) = trained_policy(dim, k, 200);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("d{dim}_k{k}")),
            &(p, xs),
            |b, (p, xs)| {
                let mut i = 0usize;
                b.iter(|| {
                    let x = &xs[i % xs.len()];
                    i += 1;
                    black_box(p.rank(black_box(x)).unwrap())
                });
            },
        );
    }
    group.finish();
}

fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    for &(dim, k) in &[(4usize, 4usize), (11, 4), (11, 8)] {
        let (p, xs) = trained_policy(dim, k, 200);
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("d{dim}_k{k}")),
            &(p, xs),
            |b, (p, xs)| {
                let mut p = p.clone();
                let mut i = 0usize;
                b.iter(|| {
                    let x = &xs[i % xs.len()];
                    let engine = i % k;
                    let reward = (i % 10) as f64 / 10.0;
                    i += 1;
                    p.update(black_box(engine), black_box(x), black_box(reward))
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_rank, bench_update);
criterion_main!(benches);
