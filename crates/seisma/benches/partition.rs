use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use seisma::{
    algebra::HazardCurves,
    partition::partition,
    reduce::reduce,
    Accumulator, WorkItem,
};

const SEED: u64 = 0x7fc3_5918_4519_c0aa;

// Heavy-tailed weights, like the source weights of a real model: most
// sources are cheap, a few are large fault sources.
fn work_items(length: usize, n_groups: u32) -> Vec<WorkItem<u32, usize>> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    (0..length)
        .map(|i| {
            let weight = if rng.gen_bool(0.05) {
                rng.gen_range(100.0..1000.0)
            } else {
                rng.gen_range(1.0..10.0)
            };
            WorkItem::new(weight, rng.gen_range(0..n_groups), i)
        })
        .collect()
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition");
    for length in [1_000, 10_000, 100_000] {
        let items = work_items(length, 8);
        group.bench_with_input(BenchmarkId::from_parameter(length), &items, |b, items| {
            b.iter_batched(
                || items.clone(),
                |items| black_box(partition(items, 64)),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn partials(n_blocks: usize, n_sites: usize, n_levels: usize) -> Vec<Accumulator<u32, HazardCurves>> {
    let mut rng = ChaCha8Rng::seed_from_u64(SEED);
    (0..n_blocks)
        .map(|block| {
            let poes = (0..n_sites * n_levels)
                .map(|_| rng.gen_range(0.0..0.01))
                .collect();
            let curves = HazardCurves::from_poes(n_sites, n_levels, poes).unwrap();
            Accumulator::singleton((block % 4) as u32, curves)
        })
        .collect()
}

fn bench_reduce(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce");
    for n_sites in [100, 1_000] {
        let parts = partials(64, n_sites, 40);
        let zeros = Accumulator::with_zeros(0..4u32, &HazardCurves::zeros(n_sites, 40));
        group.bench_with_input(BenchmarkId::from_parameter(n_sites), &parts, |b, parts| {
            b.iter_batched(
                || (parts.clone(), zeros.clone()),
                |(parts, zeros)| black_box(reduce(parts, zeros)),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_partition, bench_reduce);
criterion_main!(benches);
