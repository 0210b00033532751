//! # Gap Calculation Benchmarks
//!
//! | Case | Store | Expectation |
//! |------|-------|-------------|
//! | Sparse gaps | Every 1000th height missing | Linear in the tip |
//! | Caught up | 1M heights, nothing missing | No gap list allocated |
//! | Cold start | Empty store, tip 1M | Lazy sequence |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use se_block_ingestion::{compute_gaps, gap_ranges, GapPlan, Height, MissingHeights, PersistedHeights};

fn sparse_store(tip: Height, every: Height) -> PersistedHeights {
    (1..=tip).filter(|h| h % every != 0).collect()
}

fn bench_compute_gaps(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap-calculator");
    group.measurement_time(Duration::from_secs(10));

    for tip in [10_000u64, 100_000, 1_000_000] {
        let persisted = sparse_store(tip, 1_000);
        group.throughput(Throughput::Elements(tip));
        group.bench_with_input(BenchmarkId::new("sparse_gaps", tip), &tip, |b, &tip| {
            b.iter(|| black_box(compute_gaps(&persisted, tip)))
        });
    }

    let empty = PersistedHeights::empty();
    group.bench_function("cold_start_lazy_1m", |b| {
        b.iter(|| black_box(MissingHeights::new(&empty, 1_000_000).count()))
    });

    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("gap-plan");

    let full: PersistedHeights = (1..=1_000_000).collect();
    group.bench_function("caught_up_1m", |b| {
        b.iter(|| black_box(GapPlan::new(&full, 1_000_000)))
    });

    let sparse = sparse_store(1_000_000, 1_000);
    group.bench_function("sparse_1m", |b| {
        b.iter(|| black_box(GapPlan::new(&sparse, 1_000_000)))
    });

    let gaps = compute_gaps(&sparse, 1_000_000);
    group.bench_function("ranges_1k", |b| b.iter(|| black_box(gap_ranges(&gaps))));

    group.finish();
}

criterion_group!(benches, bench_compute_gaps, bench_plan);
criterion_main!(benches);
