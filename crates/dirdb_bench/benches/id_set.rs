//! Entry ID set benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dirdb_bench::utils::random_id_set;
use dirdb_core::{EntryIdSet, EntryIdSetCodec};

/// Benchmark encoding with both codecs.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_set_encode");

    for len in [16usize, 256, 4000].iter() {
        let set = random_id_set(*len, 8);
        group.throughput(Throughput::Elements(*len as u64));
        for codec in [EntryIdSetCodec::V1, EntryIdSetCodec::V2] {
            group.bench_with_input(BenchmarkId::new(format!("{codec:?}"), len), &set, |b, set| {
                b.iter(|| black_box(codec.encode(black_box(set)).unwrap()));
            });
        }
    }

    group.finish();
}

/// Benchmark decoding with both codecs.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_set_decode");

    for len in [16usize, 256, 4000].iter() {
        let set = random_id_set(*len, 8);
        group.throughput(Throughput::Elements(*len as u64));
        for codec in [EntryIdSetCodec::V1, EntryIdSetCodec::V2] {
            let bytes = codec.encode(&set).unwrap();
            group.bench_with_input(BenchmarkId::new(format!("{codec:?}"), len), &bytes, |b, bytes| {
                b.iter(|| black_box(codec.decode(black_box(bytes)).unwrap()));
            });
        }
    }

    group.finish();
}

/// Benchmark multi-way union.
fn bench_union(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_set_union");

    for ways in [2usize, 8, 32].iter() {
        let sets: Vec<EntryIdSet> = (0..*ways).map(|_| random_id_set(500, 64)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(ways), &sets, |b, sets| {
            b.iter(|| black_box(EntryIdSet::new_set_from_union(black_box(sets))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_union);

criterion_main!(benches);
