//! Fan-out throughput benchmark using criterion.
//!
//! Measures how fast a batch of empty jobs is submitted, executed and
//! waited on from the main thread, and from inside a job fiber.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use jobfiber::{Counter, Job, Scheduler, SchedulerConfig};

fn bench_fan_out(c: &mut Criterion) {
    let mut config = SchedulerConfig::default();
    config.job_workers = Some(num_cpus::get());
    let scheduler = Scheduler::with_config(config).unwrap();

    let mut group = c.benchmark_group("fan_out");

    for batch_size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(batch_size as u64));

        group.bench_function(BenchmarkId::new("from_thread", batch_size), |b| {
            let counter = Counter::new();
            b.iter(|| {
                scheduler.run_batch(
                    &counter,
                    (0..batch_size).map(|_| Job::new(|| std::hint::black_box(()))),
                );
                scheduler.wait_async(&counter);
            });
        });

        group.bench_function(BenchmarkId::new("from_fiber", batch_size), |b| {
            let root = Counter::new();
            b.iter(|| {
                let handle = scheduler.handle();
                scheduler.run(
                    &root,
                    Job::new(move || {
                        let counter = Counter::new();
                        handle.run_batch(
                            &counter,
                            (0..batch_size).map(|_| Job::new(|| std::hint::black_box(()))),
                        );
                        handle.wait(&counter);
                    }),
                );
                scheduler.wait_async(&root);
            });
        });
    }

    group.finish();
    scheduler.term().unwrap();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
