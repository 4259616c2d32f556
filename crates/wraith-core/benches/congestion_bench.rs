use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::time::{Duration, Instant};
use wraith_core::config::CongestionConfig;
use wraith_core::congestion::{CongestionController, TickInput};

fn bench_congestion_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("congestion_tick");

    group.bench_function("steady_state", |b| {
        b.iter_batched(
            || CongestionController::new(CongestionConfig::default(), Instant::now()),
            |mut controller| {
                let mut now = Instant::now();
                for i in 0..64 {
                    now += Duration::from_millis(50);
                    controller.tick(TickInput {
                        queue_depth: 32,
                        sent_this_tick: 20,
                        resent_this_tick: black_box(i % 3),
                        rtt: Duration::from_millis(80),
                        now,
                    });
                }
                black_box(controller.send_rate())
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_try_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("try_consume");

    group.bench_function("saturated_bucket", |b| {
        b.iter_batched(
            || {
                let mut controller = CongestionController::new(CongestionConfig::default(), Instant::now());
                controller.tick(TickInput {
                    queue_depth: 0,
                    sent_this_tick: 0,
                    resent_this_tick: 0,
                    rtt: Duration::from_millis(50),
                    now: Instant::now(),
                });
                controller
            },
            |mut controller| {
                for _ in 0..256 {
                    black_box(controller.try_consume());
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_congestion_tick, bench_try_consume);
criterion_main!(benches);
