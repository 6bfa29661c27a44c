//! Flood-count pass benchmarks.
//!
//! Run with:
//! ```
//! cargo bench --bench flood_bench
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use floodmap_rs::mesh::Assignment;
use floodmap_rs::partitioned::run_pass;
use floodmap_rs::test_support::random_field_grid;
use floodmap_rs::{EntityKind, FloodConfig, FloodCounter, PassInputs};
use std::hint::black_box;
use std::time::Duration;

// =============================================================================
// PASS BENCHMARKS
// =============================================================================

/// Full pass over a random field at increasing partition counts.
fn bench_pass_by_partitions(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass/partitions");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    let n = 128u64;
    let mesh = random_field_grid(n, 1, EntityKind::Node, 42);
    let config = FloodConfig::default();
    group.throughput(Throughput::Elements(n * n));

    for parts in [1usize, 2, 4, 8] {
        let views = mesh.decompose(parts, Assignment::Blocks).unwrap();
        group.bench_with_input(BenchmarkId::new("blocks", parts), &views, |b, views| {
            b.iter(|| black_box(run_pass(&config, views).unwrap()))
        });
    }
    group.finish();
}

/// Striped ownership maximizes boundary traffic and reconciliation rounds.
fn bench_pass_striped(c: &mut Criterion) {
    let mut group = c.benchmark_group("pass/stripes");
    group.sample_size(10);

    let n = 64u64;
    let mesh = random_field_grid(n, 1, EntityKind::Node, 7);
    let counter = FloodCounter::new(FloodConfig::default()).unwrap();
    let views = mesh.decompose(4, Assignment::Stripes).unwrap();
    let inputs = PassInputs::new(mesh.total_volume());

    group.throughput(Throughput::Elements(n * n));
    group.bench_function("execute", |b| {
        b.iter(|| black_box(counter.execute(&views, inputs).unwrap()))
    });
    group.finish();
}

// =============================================================================
// DECOMPOSITION BENCHMARKS
// =============================================================================

fn bench_decompose(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompose");
    group.sample_size(10);

    let mesh = random_field_grid(128, 2, EntityKind::Element, 3);
    for assignment in [Assignment::Blocks, Assignment::Hashed] {
        group.bench_with_input(
            BenchmarkId::new(format!("{assignment:?}"), 8),
            &assignment,
            |b, assignment| b.iter(|| black_box(mesh.decompose(8, *assignment).unwrap())),
        );
    }
    group.finish();
}

criterion_group!(
    flood_benches,
    bench_pass_by_partitions,
    bench_pass_striped,
    bench_decompose
);
criterion_main!(flood_benches);
