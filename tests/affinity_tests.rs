use jobfiber::{Counter, Job, PinningStrategy, Scheduler, SchedulerConfig};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

fn run_named_jobs(strategy: PinningStrategy) -> HashSet<String> {
    let mut config = SchedulerConfig::with_workers(2, 1);
    config.fiber_pool_size = 8;
    config.fiber_stack_size = 128 * 1024;
    config.job_pinning = strategy;
    let scheduler = Scheduler::with_config(config).unwrap();

    let names = Arc::new(Mutex::new(HashSet::new()));
    let counter = Counter::new();
    scheduler.run_batch(
        &counter,
        (0..64).map(|_| {
            let names = names.clone();
            Job::new(move || {
                if let Some(name) = std::thread::current().name() {
                    names.lock().unwrap().insert(name.to_owned());
                }
                std::thread::sleep(std::time::Duration::from_micros(100));
            })
        }),
    );
    scheduler.wait_async(&counter);
    scheduler.term().unwrap();

    Arc::try_unwrap(names).unwrap().into_inner().unwrap()
}

#[test]
fn test_linear_pinning_runs_jobs() {
    let names = run_named_jobs(PinningStrategy::Linear);
    assert!(!names.is_empty());
    assert!(names.iter().all(|n| n == "Job #1" || n == "Job #2"), "{names:?}");
}

#[test]
fn test_avoid_smt_pinning_runs_jobs() {
    let names = run_named_jobs(PinningStrategy::AvoidSMT);
    assert!(names.iter().all(|n| n.starts_with("Job #")), "{names:?}");
}

#[test]
fn test_unpinned_workers_run_jobs() {
    let names = run_named_jobs(PinningStrategy::None);
    assert!(!names.is_empty());
}

#[test]
fn test_more_workers_than_cores() {
    // Pinning wraps around instead of failing.
    let workers = num_cpus::get() + 1;
    let mut config = SchedulerConfig::with_workers(workers, 1);
    config.fiber_pool_size = workers * 2;
    config.fiber_stack_size = 64 * 1024;
    let scheduler = Scheduler::with_config(config).unwrap();

    let counter = Counter::new();
    scheduler.run_batch(&counter, (0..workers * 4).map(|_| Job::new(|| {})));
    scheduler.wait_async(&counter);
    scheduler.term().unwrap();
}
