// benches/slot_routing_bench.rs

//! Cluster slot routing benchmarks: hashing keys to their slot, and
//! building the deterministic key names every primitive derives from its
//! name (spec §6 "Key-name conventions").

use criterion::{Criterion, criterion_group, criterion_main};
use orbiter::core::keys;
use orbiter::core::topology::cluster::slot::get_slot;

fn bench_get_slot(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_slot");

    group.bench_function("untagged_key", |b| {
        b.iter(|| get_slot(b"user:1000:profile"));
    });

    group.bench_function("hash_tagged_key", |b| {
        b.iter(|| get_slot(b"{user:1000}:profile"));
    });

    group.bench_function("short_key", |b| {
        b.iter(|| get_slot(b"k"));
    });

    group.finish();
}

fn bench_key_name_conventions(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_name_conventions");

    group.bench_function("aux", |b| {
        b.iter(|| keys::aux("my-distributed-map", "ttlset"));
    });

    group.bench_function("channel", |b| {
        b.iter(|| keys::channel("my-distributed-map"));
    });

    group.finish();
}

criterion_group!(benches, bench_get_slot, bench_key_name_conventions);
criterion_main!(benches);
