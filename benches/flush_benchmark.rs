use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ranked_list_sync::{
    engine::{Engine, EngineConfig},
    logging,
    protocol::FeedMessage,
    simulator::{Category, FeedSession},
};
use tokio::sync::mpsc;

fn bench_frame_flush(c: &mut Criterion) {
    logging::set_silent(true);
    let rounds: usize = 20;

    let mut group = c.benchmark_group("frame_flush");
    group.throughput(Throughput::Elements(rounds as u64));

    group.bench_function("tick_bursts", |b| {
        b.iter_custom(|iters| {
            let mut total = Duration::ZERO;
            for iter in 0..iters {
                let mut session = FeedSession::new(iter, 400, 25, 1.0).expect("session");
                let (outbound, _control) = mpsc::unbounded_channel();
                let mut engine = Engine::new(EngineConfig::default(), outbound);
                let now = Instant::now();
                engine.connected(now);
                session.publish();
                for category in Category::ALL {
                    engine.subscribe(category.name(), now);
                    if let Some(snapshot) = session.snapshot(category.name()) {
                        engine.handle_message(snapshot, now);
                    }
                }

                let mut bursts: Vec<Vec<FeedMessage>> = Vec::with_capacity(rounds);
                for _ in 0..rounds {
                    let mut burst = session.step();
                    burst.extend(session.publish());
                    bursts.push(burst);
                }

                let start = Instant::now();
                let mut applied = 0usize;
                for burst in bursts {
                    for message in burst {
                        engine.handle_message(message, now);
                    }
                    applied += engine.flush_frame().ticks_applied;
                }
                total += start.elapsed();
                assert!(applied > 0, "expected ticks to reach listed symbols");
            }
            total
        });
    });

    group.finish();
}

criterion_group!(benches, bench_frame_flush);
criterion_main!(benches);
