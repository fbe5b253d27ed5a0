use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossbeam_channel::unbounded;
use std::sync::Arc;
use std::time::Duration;

use looper_queue::{
    Handler, LooperConfig, LooperThread, ManualClock, Message, MessageFilter, MessageQueue,
    MessageTarget, Target, ThreadParker,
};

struct Sink;

impl MessageTarget for Sink {
    fn dispatch_message(&self, message: &Message) {
        black_box(message.what);
    }
}

fn frozen_queue(now: u64) -> MessageQueue {
    MessageQueue::with_parts(
        true,
        Arc::new(ManualClock::new(now)),
        Arc::new(ThreadParker::new()),
    )
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    group.bench_function("enqueue_next", |b| {
        let queue = frozen_queue(1_000);
        let target: Target = Arc::new(Sink);

        b.iter(|| {
            queue
                .enqueue(Message::with_what(target.clone(), black_box(1)), 1_000)
                .unwrap();
            black_box(queue.next().unwrap());
        });
    });

    group.bench_function("enqueue_into_1k_pending", |b| {
        let queue = frozen_queue(1);
        let target: Target = Arc::new(Sink);
        for i in 0..1_000u64 {
            queue
                .enqueue(Message::with_what(target.clone(), 0), 10 + i)
                .unwrap();
        }
        let filter = MessageFilter::what(&target, 7);

        b.iter(|| {
            queue
                .enqueue(Message::with_what(target.clone(), 7), black_box(500))
                .unwrap();
            black_box(queue.remove_messages(&filter));
        });
    });

    group.bench_function("barrier_post_remove", |b| {
        let queue = frozen_queue(1_000);
        let target: Target = Arc::new(Sink);
        for i in 0..64u64 {
            queue
                .enqueue(Message::with_what(target.clone(), 0), 2_000 + i)
                .unwrap();
        }

        b.iter(|| {
            let token = queue.post_sync_barrier(black_box(1_500)).unwrap();
            queue.remove_sync_barrier(token).unwrap();
        });
    });

    group.finish();
}

fn bench_looper(c: &mut Criterion) {
    let mut group = c.benchmark_group("looper");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("handler_round_trip", |b| {
        let looper = LooperThread::spawn(LooperConfig {
            name: "bench".to_string(),
            slow_dispatch_threshold_ms: None,
            slow_delivery_threshold_ms: None,
            ..LooperConfig::default()
        })
        .unwrap();
        let (tx, rx) = unbounded();
        let handler = Handler::new(looper.queue(), "bench", move |message: &Message| {
            let _ = tx.send(message.what);
        });

        b.iter(|| {
            handler.send_empty_message(black_box(3)).unwrap();
            black_box(rx.recv().unwrap());
        });

        looper.quit().unwrap();
        looper.join().unwrap();
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_looper);
criterion_main!(benches);
