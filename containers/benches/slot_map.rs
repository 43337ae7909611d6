//! Benchmarks for the generational slot map backing the resource registry
//!
//! - Insert: bulk insertion of sequential values
//! - Get: lookup of every live slot
//! - Churn: remove/insert cycles that exercise free-list reuse and generation bumps

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use stagehand_containers::prelude::SlotMap;
use std::hint::black_box;

fn benchmark_slot_map_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_map_insert");
    for size in [100, 1_000, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("SlotMap", size), size, |b, &size| {
            b.iter(|| {
                let mut slot_map: SlotMap<u64> = SlotMap::default();
                for i in 0..size {
                    black_box(slot_map.insert(black_box(i)));
                }
                black_box(slot_map)
            });
        });
    }
    group.finish();
}

fn benchmark_slot_map_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_map_get");
    for size in [100, 1_000, 10_000, 100_000].iter() {
        let mut slot_map: SlotMap<u64> = SlotMap::default();
        let slots: Vec<_> = (0..*size).map(|i| slot_map.insert(i)).collect();
        group.bench_with_input(BenchmarkId::new("SlotMap", size), size, |b, _| {
            b.iter(|| {
                for slot in &slots {
                    black_box(slot_map.get(black_box(*slot)));
                }
            });
        });
    }
    group.finish();
}

fn benchmark_slot_map_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_map_churn");
    for size in [100, 1_000, 10_000].iter() {
        group.bench_with_input(BenchmarkId::new("SlotMap", size), size, |b, &size| {
            b.iter_batched(
                || {
                    let mut slot_map: SlotMap<u64> = SlotMap::default();
                    let slots: Vec<_> = (0..size).map(|i| slot_map.insert(i)).collect();
                    (slot_map, slots)
                },
                |(mut slot_map, slots)| {
                    for slot in slots {
                        let value = slot_map.remove(black_box(slot)).unwrap();
                        black_box(slot_map.insert(value));
                    }
                    black_box(slot_map)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_slot_map_insert,
    benchmark_slot_map_get,
    benchmark_slot_map_churn
);
criterion_main!(benches);
