//! Performance benchmarks for the member relay.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use member_relay::{
    reconcile, ChangeStream, MemberId, MemberSnapshot, MembersState, SubscriptionController,
};
use crossbeam_channel::unbounded;

fn ids(range: std::ops::Range<usize>) -> Vec<MemberId> {
    range.map(|i| MemberId::new(format!("member-{}", i))).collect()
}

/// Benchmark reconciliation when a sliding window of members changes
fn bench_reconcile_shift(c: &mut Criterion) {
    let mut group = c.benchmark_group("reconcile_shift");

    for size in [10, 100, 1000] {
        let current = ids(0..size);
        let requested = ids(size / 10..size + size / 10);

        group.bench_with_input(BenchmarkId::new("size", size), &size, |b, _| {
            b.iter(|| black_box(reconcile(&current, &requested)));
        });
    }

    group.finish();
}

/// Benchmark the common case: a repeated registration with no change
fn bench_reconcile_noop(c: &mut Criterion) {
    let current = ids(0..1000);

    c.bench_function("reconcile_noop_1000", |b| {
        b.iter(|| black_box(reconcile(&current, &current)));
    });
}

/// Benchmark relay throughput through the subscription controller
fn bench_relay_throughput(c: &mut Criterion) {
    let state: MembersState = (0..20)
        .map(|i| MemberSnapshot::new(format!("m{}@example.com", i), "Member", i.to_string()))
        .collect();

    c.bench_function("relay_1000_snapshots", |b| {
        b.iter(|| {
            let controller = SubscriptionController::new();
            let (emitter, stream) = ChangeStream::bounded(256);
            let (tx, rx) = unbounded();
            controller
                .attach(stream, move |s| tx.send(s).unwrap(), |_| {})
                .unwrap();

            for _ in 0..1000 {
                emitter.emit(state.clone()).unwrap();
            }
            for _ in 0..1000 {
                black_box(rx.recv().unwrap());
            }
        });
    });
}

criterion_group!(
    benches,
    bench_reconcile_shift,
    bench_reconcile_noop,
    bench_relay_throughput
);
criterion_main!(benches);
