//! Tick dispatch benchmarks

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serial_broadcast_core::{
    DeviceRegistry, EventBus, ManualClock, MemoryOpener, PlaybackScheduler, Timeline,
};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

fn broadcast_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("broadcast");

    for devices in [1usize, 8, 32] {
        let names: Vec<String> = (0..devices).map(|i| format!("COM{i}")).collect();
        let opener = MemoryOpener::with_ports(names.iter().cloned());
        let registry = DeviceRegistry::new(opener, EventBus::new(16));
        registry.connect_each(&names, 9600);

        group.throughput(Throughput::Elements(devices as u64));
        group.bench_with_input(BenchmarkId::from_parameter(devices), &registry, |b, registry| {
            b.iter(|| black_box(registry.broadcast_write(black_box(&[0x55u8][..]))));
        });
    }

    group.finish();
}

fn playback_benchmark(c: &mut Criterion) {
    let events: u32 = 1000;
    let pairs: Vec<(f64, u8)> = (0..events)
        .map(|i| (f64::from(i) * 0.001, (i % 256) as u8))
        .collect();
    let timeline = Timeline::from_pairs(pairs).unwrap();

    let mut group = c.benchmark_group("playback");
    group.throughput(Throughput::Elements(u64::from(events)));

    group.bench_function("full_timeline_4_devices", |b| {
        b.iter(|| {
            let opener = MemoryOpener::with_ports(["A", "B", "C", "D"]);
            let registry = Arc::new(DeviceRegistry::new(opener, EventBus::new(16)));
            registry.connect_each(["A", "B", "C", "D"], 9600);

            let clock = ManualClock::new();
            let mut scheduler = PlaybackScheduler::new(timeline.clone(), registry)
                .with_clock(Arc::new(clock.clone()));
            scheduler.start().unwrap();
            while !scheduler.is_complete() {
                clock.advance(Duration::from_millis(10));
                black_box(scheduler.tick());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, broadcast_benchmark, playback_benchmark);
criterion_main!(benches);
