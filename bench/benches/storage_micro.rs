//! Storage microbenchmarks using Criterion.
//!
//! These measure individual table operations in isolation:
//! - Entity append (single and bulk)
//! - Delete (swap-remove)
//! - Move between tables (migration)
//! - Bulk merge

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use archetable_bench::{bench_store, entity, ids};

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for count in [100, 1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("single", count), &count, |b, &n| {
            b.iter(|| {
                let mut store = bench_store();
                let table = store.table_ensure(vec![ids::POSITION, ids::VELOCITY]);
                for i in 0..n {
                    black_box(store.append(table, entity(i), true, false));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("bulk", count), &count, |b, &n| {
            b.iter(|| {
                let mut store = bench_store();
                let table = store.table_ensure(vec![ids::POSITION, ids::VELOCITY]);
                let entities: Vec<_> = (0..n).map(entity).collect();
                black_box(store.appendn(table, n as usize, Some(&entities)));
            });
        });
    }

    group.finish();
}

fn bench_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("delete");

    for count in [1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("swap_remove", count), &count, |b, &n| {
            let mut rng = ChaCha8Rng::seed_from_u64(42);
            b.iter(|| {
                let mut store = bench_store();
                let table = store.table_ensure(vec![ids::POSITION, ids::HEALTH]);
                for i in 0..n {
                    store.append(table, entity(i), true, false);
                }
                let mut rows: Vec<usize> = (0..n as usize).collect();
                rows.shuffle(&mut rng);
                for _ in 0..n {
                    let count = store.count(table);
                    store.delete(table, rows[0] % count.max(1), true);
                    rows.rotate_left(1);
                }
            });
        });
    }

    group.finish();
}

fn bench_migrate(c: &mut Criterion) {
    let mut group = c.benchmark_group("migrate");

    for count in [100, 1_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("add_component", count), &count, |b, &n| {
            b.iter(|| {
                let mut store = bench_store();
                let src = store.table_ensure(vec![ids::POSITION]);
                let dst =
                    store.table_ensure_from(vec![ids::POSITION, ids::VELOCITY], Some(src));
                for i in 0..n {
                    store.append(src, entity(i), true, false);
                }
                for i in 0..n {
                    black_box(store.migrate(entity(i), dst));
                }
            });
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for count in [1_000, 10_000] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("bulk", count), &count, |b, &n| {
            b.iter(|| {
                let mut store = bench_store();
                let src = store.table_ensure(vec![ids::POSITION]);
                let dst = store.table_ensure(vec![ids::POSITION, ids::ROTATION]);
                for i in 0..n {
                    store.append(src, entity(i), true, false);
                }
                store.merge(dst, src);
                black_box(store.count(dst));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append, bench_delete, bench_migrate, bench_merge);
criterion_main!(benches);
