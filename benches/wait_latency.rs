//! Wait latency benchmark using criterion.
//!
//! Measures the round trip of a single job: submit, run, complete and wake
//! the waiter. The fiber variant includes one park and one resume.

use criterion::{Criterion, criterion_group, criterion_main};
use jobfiber::{Counter, Job, Scheduler, SchedulerConfig};
use std::time::Instant;

fn bench_wait_latency(c: &mut Criterion) {
    let scheduler = Scheduler::with_config(SchedulerConfig::with_workers(2, 1)).unwrap();

    let mut group = c.benchmark_group("wait_latency");

    group.bench_function("thread_waiter", |b| {
        let counter = Counter::new();
        b.iter(|| {
            scheduler.run(&counter, Job::new(|| std::hint::black_box(())));
            scheduler.wait_async(&counter);
        });
    });

    group.bench_function("fiber_waiter", |b| {
        b.iter_custom(|iters| {
            let handle = scheduler.handle();
            let root = Counter::new();
            let start = Instant::now();
            scheduler.run(
                &root,
                Job::new(move || {
                    let counter = Counter::new();
                    for _ in 0..iters {
                        handle.run(&counter, Job::new(|| std::hint::black_box(())));
                        handle.wait(&counter);
                    }
                }),
            );
            scheduler.wait_async(&root);
            start.elapsed()
        });
    });

    group.finish();
    scheduler.term().unwrap();
}

criterion_group!(benches, bench_wait_latency);
criterion_main!(benches);
