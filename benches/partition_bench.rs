//! Benchmarks for partsync
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use partsync::entry::{EntryStore, SizeTransform};
use partsync::hook::NullSink;
use partsync::partition::{BinPacker, LimitDispatcher, Limits};

fn entries(count: u64) -> EntryStore {
    let mut store = EntryStore::new(SizeTransform::default());
    for i in 0..count {
        // Spread of small and large files, some empty
        let size = (i * 7919) % 1_048_576;
        store.add(format!("/data/dir{}/file{}", i % 100, i), size, false).unwrap();
    }
    store
}

fn benchmark_binpack(c: &mut Criterion) {
    let store = entries(100_000);

    c.bench_function("binpack_100k_into_16", |b| {
        let packer = BinPacker::new(16).unwrap();
        b.iter(|| {
            let parts = packer.dispatch(&store, &mut NullSink).unwrap();
            black_box(parts);
        })
    });
}

fn benchmark_limit_dispatch(c: &mut Criterion) {
    let limits = Limits {
        max_entries: Some(2000),
        max_size: Some(4 << 30),
    };

    c.bench_function("limit_dispatch_100k_live", |b| {
        b.iter(|| {
            let mut store = entries(100_000);
            let mut dispatcher = LimitDispatcher::new(limits, &SizeTransform::default())
                .unwrap()
                .releasing();
            dispatcher.dispatch_all(&mut store, &mut NullSink).unwrap();
            let parts = dispatcher.finish(&mut store, &mut NullSink).unwrap();
            black_box(parts);
        })
    });
}

criterion_group!(benches, benchmark_binpack, benchmark_limit_dispatch);
criterion_main!(benches);
