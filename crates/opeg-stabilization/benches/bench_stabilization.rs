// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BENCHMARK SUITE - opeg-stabilization
//
// Measures recipient selection and full transaction planning, the two
// costs every validator pays per issuing block.
// Run: cargo bench -p opeg-stabilization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use opeg_core::{BlockContext, Hash256, StabilizationParams, StaticDirectory, MICRO_PER_UNIT};
use opeg_stabilization::recipients::select_recipients;
use opeg_stabilization::StabilizationMining;
use std::sync::Arc;

// ─────────────────────────────────────────────────────────────────
// SELECTION BENCHMARKS
// ─────────────────────────────────────────────────────────────────

fn bench_select_recipients(c: &mut Criterion) {
    let mut group = c.benchmark_group("recipients/select");
    for pool_size in [100, 10_000, 100_000] {
        let pool: Vec<String> = (0..pool_size).map(|i| format!("user_{:06}", i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(pool_size), &pool, |b, p| {
            b.iter(|| black_box(select_recipients(p, 1_000, &Hash256([9u8; 32]), "OUSD")))
        });
    }
    group.finish();
}

// ─────────────────────────────────────────────────────────────────
// PLANNING BENCHMARKS
// ─────────────────────────────────────────────────────────────────

fn bench_plan_transactions(c: &mut Criterion) {
    let directory = StaticDirectory::new()
        .with_population("OEUR", 20_000)
        .with_population("OJPY", 20_000)
        .with_population("OUSD", 20_000);
    let mut mining = StabilizationMining::new(StabilizationParams::default(), Arc::new(directory));
    mining.update_stability_status("OEUR", MICRO_PER_UNIT, MICRO_PER_UNIT, MICRO_PER_UNIT, 1);
    mining.update_stability_status("OJPY", MICRO_PER_UNIT, MICRO_PER_UNIT, MICRO_PER_UNIT, 1);
    mining.update_stability_status("OUSD", MICRO_PER_UNIT, 1_300_000, MICRO_PER_UNIT, 1);

    let block = BlockContext::new(1_000, 1_750_000_000, Hash256([3u8; 32])).with_volume("OUSD", 10_000_000);
    c.bench_function("mining/plan_one_currency", |b| {
        b.iter(|| black_box(mining.plan_stabilization_transactions(&block)))
    });
}

criterion_group!(benches, bench_select_recipients, bench_plan_transactions);
criterion_main!(benches);
