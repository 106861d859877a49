//! Benchmarks for the set-reconciliation sketch codec.
//!
//! The bootstrap path encodes one sketch per request and the responder
//! subtracts and decodes one per answer, so these are the handshake's
//! hot spots.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use agora_core::{ContentHash, DeltaProfile, DeltaSet};

fn hashes(n: u32) -> Vec<ContentHash> {
    (0..n).map(|i| ContentHash::hash(&i.to_le_bytes())).collect()
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_encode");
    for (profile, n) in [
        (DeltaProfile::Compact, 1_000u32),
        (DeltaProfile::Compact, 10_000),
        (DeltaProfile::Wide, 10_000),
    ] {
        let items = hashes(n);
        group.bench_with_input(
            BenchmarkId::new(format!("{profile:?}"), n),
            &items,
            |b, items| b.iter(|| DeltaSet::encode(profile, 7, items)),
        );
    }
    group.finish();
}

fn bench_subtract_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta_subtract_decode");
    for (profile, diff) in [
        (DeltaProfile::Compact, 50u32),
        (DeltaProfile::Compact, 300),
        (DeltaProfile::Wide, 2_000),
    ] {
        // 5000 shared items, `diff` items only on the local side.
        let shared = hashes(5_000);
        let local_set: Vec<ContentHash> = shared
            .iter()
            .copied()
            .chain((0..diff).map(|i| ContentHash::hash(&(1_000_000 + i).to_le_bytes())))
            .collect();

        let local = DeltaSet::encode(profile, 7, &local_set);
        let remote = DeltaSet::encode(profile, 7, &shared);

        group.bench_with_input(
            BenchmarkId::new(format!("{profile:?}"), diff),
            &(local, remote),
            |b, (local, remote)| {
                b.iter(|| {
                    let diff = local.subtract(remote).expect("matching sketches");
                    diff.decode().expect("difference within capacity")
                })
            },
        );
    }
    group.finish();
}

fn bench_estimate(c: &mut Criterion) {
    let items = hashes(10_000);
    let sketch = DeltaSet::encode(DeltaProfile::Wide, 7, &items);
    c.bench_function("delta_estimate_size", |b| b.iter(|| sketch.estimate_size()));
}

criterion_group!(benches, bench_encode, bench_subtract_decode, bench_estimate);
criterion_main!(benches);
