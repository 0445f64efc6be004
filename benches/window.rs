//! Benchmarks for window insertion and threshold queries

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shoulder_link::aggregator::ManualClock;
use shoulder_link::filter::SignalFilter;
use shoulder_link::window::{AdaptiveThreshold, OrderedWindow};

fn generate_values(count: usize) -> Vec<u16> {
    (0..count)
        .map(|i| (2000.0 + 1500.0 * (i as f32 * 0.37).sin()) as u16)
        .collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");

    let values = generate_values(1000);
    group.throughput(Throughput::Elements(1000));

    group.bench_function("insert_1000_values", |b| {
        b.iter(|| {
            let mut window = OrderedWindow::new();
            for &value in &values {
                window.insert(value);
            }
            black_box(window.len());
        })
    });

    group.bench_function("insert_1000_values_capacity_255", |b| {
        b.iter(|| {
            let mut window = OrderedWindow::with_capacity(255);
            for &value in &values {
                window.insert(value);
            }
            black_box(window.len());
        })
    });

    group.finish();
}

fn bench_percentile(c: &mut Criterion) {
    let mut group = c.benchmark_group("percentile");

    let mut window = OrderedWindow::new();
    for value in generate_values(500) {
        window.insert(value);
    }

    group.bench_function("percentile_90", |b| {
        b.iter(|| black_box(window.percentile(black_box(90))))
    });

    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("threshold");

    group.throughput(Throughput::Elements(10_000));

    // 100 Hz sampling for 100 seconds of device time
    group.bench_function("store_10000_samples", |b| {
        b.iter(|| {
            let clock = ManualClock::new(0);
            let mut threshold = AdaptiveThreshold::new(100.0, &clock);
            for i in 0..10_000u32 {
                threshold.store(30.0 + 10.0 * (i as f32 * 0.01).sin());
                clock.advance(10);
            }
            black_box(threshold.get_threshold(90));
        })
    });

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    group.throughput(Throughput::Elements(10_000));

    group.bench_function("low_pass_10000_samples", |b| {
        b.iter(|| {
            let mut filter = SignalFilter::low_pass();
            let mut last = 0.0;
            for i in 0..10_000 {
                last = filter.filter(black_box(i as f32 * 0.01).sin());
            }
            black_box(last);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_insert,
    bench_percentile,
    bench_store,
    bench_filter
);

criterion_main!(benches);
