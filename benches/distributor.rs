//! Benchmarks for grouping and distribution.
//!
//! Run with: cargo bench --bench distributor

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chanrelay::client::{ChannelRef, MediaKind, Message};
use chanrelay::distribute::{distribute, Strategy};
use chanrelay::group::fold_units;

fn make_messages(count: usize) -> Vec<Message> {
    (0..count)
        .map(|i| Message {
            channel: ChannelRef::new("@src"),
            id: i as i64 + 1,
            date: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            text: None,
            caption: None,
            group_id: if i % 7 < 3 { Some(format!("g{}", i / 7)) } else { None },
            kind: MediaKind::Photo,
            size: 1u64 << (i % 20),
            file_name: None,
        })
        .collect()
}

fn bench_fold_units(c: &mut Criterion) {
    let mut group = c.benchmark_group("group/fold_units");

    for count in [100, 1_000, 10_000].iter() {
        let messages = make_messages(*count);
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| black_box(fold_units(messages.clone())))
        });
    }

    group.finish();
}

fn bench_distribute(c: &mut Criterion) {
    let mut group = c.benchmark_group("distribute/media_group_aware");

    for count in [100, 1_000, 10_000].iter() {
        let units = fold_units(make_messages(*count));
        let sessions: Vec<String> = (0..4).map(|i| format!("session-{i}")).collect();

        group.throughput(Throughput::Elements(units.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| {
                black_box(
                    distribute(units.clone(), &sessions, Strategy::MediaGroupAware).unwrap(),
                )
            })
        });
    }

    group.finish();
}

fn bench_distribute_range(c: &mut Criterion) {
    let units = fold_units(make_messages(1_000));
    let sessions: Vec<String> = (0..4).map(|i| format!("session-{i}")).collect();

    c.bench_function("distribute/range/1000", |b| {
        b.iter(|| black_box(distribute(units.clone(), &sessions, Strategy::Range).unwrap()))
    });
}

criterion_group!(benches, bench_fold_units, bench_distribute, bench_distribute_range);
criterion_main!(benches);
