use jobfiber::{Counter, IoCounter, Job, Scheduler, SchedulerHandle};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Sums `0..n` by splitting the range in halves until it is small, waiting on
/// the children of every split.
fn split_sum(handle: &SchedulerHandle, range: std::ops::Range<usize>, total: &Arc<AtomicUsize>) {
    if range.len() <= 1 << 15 {
        total.fetch_add(range.sum(), Ordering::Relaxed);
        return;
    }
    let mid = range.start + range.len() / 2;
    let counter = Counter::new();
    let halves = [range.start..mid, mid..range.end].map(|half| {
        let handle = handle.clone();
        let total = total.clone();
        Job::new(move || split_sum(&handle, half, &total))
    });
    handle.run_batch(&counter, halves);
    handle.wait(&counter);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_thread_names(true)
        .init();

    println!("jobfiber - Hybrid Thread + Fiber Job Scheduler\n");

    let scheduler = match Scheduler::init() {
        Ok(scheduler) => scheduler,
        Err(e) => {
            eprintln!("Failed to start scheduler: {}", e);
            std::process::exit(1);
        }
    };
    println!(
        "Started {} job workers, {} I/O workers, {} fibers\n",
        scheduler.job_workers(),
        scheduler.io_workers(),
        scheduler.fiber_capacity()
    );

    // Example 1: Simple job execution
    println!("Example 1: Simple job execution");
    let counter = Counter::new();
    scheduler.run(&counter, Job::new(|| println!("  Hello from a fiber job!")));
    scheduler.wait_async(&counter);
    println!("  Job completed\n");

    // Example 2: Nested fan-out with fiber waits
    println!("Example 2: Recursive split sum");
    let n = 1 << 20;
    let total = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let root = Counter::new();
    let handle = scheduler.handle();
    let total_clone = total.clone();
    scheduler.run(&root, Job::new(move || split_sum(&handle, 0..n, &total_clone)));
    scheduler.wait_async(&root);
    let expected: usize = (0..n).sum();
    println!("  Sum of 0..{} in {:?}", n, start.elapsed());
    println!("  Result: {} (expected: {})\n", total.load(Ordering::Relaxed), expected);

    // Example 3: Blocking work on the I/O workers
    println!("Example 3: I/O tasks");
    let io = IoCounter::new();
    for i in 0..4 {
        scheduler.run_io_tracked(&io, move || {
            std::thread::sleep(std::time::Duration::from_millis(10));
            println!("  I/O task {} finished", i);
        });
    }
    while !io.done() {
        std::thread::yield_now();
    }
    println!();

    let metrics = scheduler.metrics();
    println!(
        "Jobs: {} completed, {} panicked, {} fiber parks, {:.2} jobs/second\n",
        metrics.jobs_completed,
        metrics.job_panics,
        metrics.fibers_parked,
        metrics.jobs_per_second()
    );

    println!("Shutting down scheduler...");
    match scheduler.term() {
        Ok(()) => println!("Done!"),
        Err(e) => eprintln!("Shutdown error: {}", e),
    }
}
