use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use market_core::{ManualClock, MemoryPriceStore};
use runtime::{EngineConfig, EngineEvent, MarketEngine};
use strategy::GeneratorConfig;
use time::{macros::datetime, Duration};
use tokio::runtime::Builder;

const BENCH_INSTRUMENTS: usize = 100;
const BENCH_TICKS: u64 = 20;

fn bench_engine_ticks(c: &mut Criterion) {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .expect("tokio runtime should build");
    let ids: Vec<i64> = (1..=BENCH_INSTRUMENTS as i64).collect();

    let mut group = c.benchmark_group("engine_ticks");
    group.throughput(Throughput::Elements(BENCH_TICKS * BENCH_INSTRUMENTS as u64));

    group.bench_function(BenchmarkId::new("uniform", BENCH_INSTRUMENTS), |b| {
        b.iter(|| {
            runtime.block_on(async {
                let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 12:00:00 UTC)));
                let store = Arc::new(MemoryPriceStore::with_instruments(clock.clone(), &ids));
                let generator = GeneratorConfig::default()
                    .build()
                    .expect("default generator should build");
                let config = EngineConfig {
                    seed: Some(7),
                    ..EngineConfig::default()
                };
                let handle = MarketEngine::spawn(config, generator, store, clock.clone());
                let mut events = handle.subscribe_events();
                handle.reload().await.expect("reload should succeed");
                handle.start(None).await.expect("start should succeed");

                let mut ticks = 0;
                while ticks < BENCH_TICKS {
                    if let Ok(EngineEvent::Rescheduled { .. }) = events.recv().await {
                        ticks += 1;
                        clock.advance(Duration::seconds(15));
                    }
                }
                handle.shutdown().await.expect("shutdown should succeed");
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_engine_ticks);
criterion_main!(benches);
