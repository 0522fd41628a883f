//! Scenario tests for the fiber-based scheduler.

use crate::{Counter, Job, Scheduler, SchedulerConfig, SchedulerHandle};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn scheduler(job_workers: usize) -> Scheduler {
    let mut config = SchedulerConfig::with_workers(job_workers, 1);
    config.fiber_pool_size = 32;
    config.fiber_stack_size = 128 * 1024;
    Scheduler::with_config(config).expect("scheduler should start")
}

#[test]
fn test_single_job_increments() {
    let scheduler = scheduler(2);
    let value = Arc::new(AtomicUsize::new(0));
    let value_clone = value.clone();

    let counter = Counter::new();
    scheduler.run(
        &counter,
        Job::new(move || {
            value_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    scheduler.wait_async(&counter);

    assert_eq!(value.load(Ordering::SeqCst), 1);
    assert!(counter.done());
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_eight_jobs_append_indices() {
    let scheduler = scheduler(4);
    let handle = scheduler.handle();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();

    let root = Counter::new();
    scheduler.run(
        &root,
        Job::new(move || {
            let counter = Counter::new();
            handle.run_batch(
                &counter,
                (0..8).map(|i| {
                    let seen = seen_clone.clone();
                    Job::new(move || seen.lock().unwrap().push(i))
                }),
            );
            handle.wait(&counter);
            assert!(counter.done());
            assert_eq!(seen_clone.lock().unwrap().len(), 8);
        }),
    );
    scheduler.wait_async(&root);

    let set: BTreeSet<_> = seen.lock().unwrap().iter().copied().collect();
    assert_eq!(set, (0..8).collect());
    assert_eq!(scheduler.metrics().job_panics, 0);
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_wait_parks_until_all_jobs_ran_once() {
    let scheduler = scheduler(2);
    let handle = scheduler.handle();
    let runs = Arc::new((0..16).map(|_| AtomicUsize::new(0)).collect::<Vec<_>>());
    let runs_clone = runs.clone();

    let root = Counter::new();
    scheduler.run(
        &root,
        Job::new(move || {
            let counter = Counter::new();
            handle.run_batch(
                &counter,
                (0..16).map(|i| {
                    let runs = runs_clone.clone();
                    Job::new(move || {
                        thread::sleep(Duration::from_millis(1));
                        runs[i].fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
            handle.wait(&counter);
            for run in runs_clone.iter() {
                assert_eq!(run.load(Ordering::SeqCst), 1);
            }
        }),
    );
    scheduler.wait_async(&root);

    assert!(runs.iter().all(|r| r.load(Ordering::SeqCst) == 1));
    assert_eq!(scheduler.metrics().job_panics, 0);
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_wait_on_done_counter_consumes_no_fiber() {
    let scheduler = scheduler(1);
    let handle = scheduler.handle();
    let observed = Arc::new(Mutex::new(None));
    let observed_clone = observed.clone();

    let root = Counter::new();
    scheduler.run(
        &root,
        Job::new(move || {
            let before = handle.idle_fibers();
            let idle = Counter::new();
            handle.wait(&idle);
            *observed_clone.lock().unwrap() = Some((before, handle.idle_fibers()));
        }),
    );
    scheduler.wait_async(&root);

    let (before, after) = observed.lock().unwrap().expect("job should have run");
    assert_eq!(before, after);
    assert_eq!(scheduler.metrics().fibers_parked, 0);
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_nested_waits_return_every_fiber() {
    let scheduler = scheduler(2);
    let handle = scheduler.handle();
    let total = Arc::new(AtomicUsize::new(0));
    let total_clone = total.clone();

    fn fan_out(handle: &SchedulerHandle, depth: usize, total: &Arc<AtomicUsize>) {
        total.fetch_add(1, Ordering::SeqCst);
        if depth == 0 {
            return;
        }
        let counter = Counter::new();
        handle.run_batch(
            &counter,
            (0..3).map(|_| {
                let handle = handle.clone();
                let total = total.clone();
                Job::new(move || fan_out(&handle, depth - 1, &total))
            }),
        );
        handle.wait(&counter);
    }

    let root = Counter::new();
    let root_handle = handle.clone();
    scheduler.run(&root, Job::new(move || fan_out(&root_handle, 2, &total_clone)));
    scheduler.wait_async(&root);

    // 1 + 3 + 9 invocations.
    assert_eq!(total.load(Ordering::SeqCst), 13);
    assert!(scheduler.metrics().jobs_completed >= 13);
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_counter_reuse_after_wait() {
    let scheduler = scheduler(2);
    let handle = scheduler.handle();
    let sum = Arc::new(AtomicUsize::new(0));
    let sum_clone = sum.clone();

    let root = Counter::new();
    scheduler.run(
        &root,
        Job::new(move || {
            let counter = Counter::new();
            for round in 0..5 {
                let sum = sum_clone.clone();
                handle.run(
                    &counter,
                    Job::new(move || {
                        sum.fetch_add(round, Ordering::SeqCst);
                    }),
                );
                handle.wait(&counter);
            }
        }),
    );
    scheduler.wait_async(&root);

    assert_eq!(sum.load(Ordering::SeqCst), 10);
    scheduler.term().expect("Shutdown failed");
}

#[test]
fn test_term_restores_fiber_pool() {
    let scheduler = scheduler(3);
    let handle = scheduler.handle();

    let root = Counter::new();
    scheduler.run_batch(
        &root,
        (0..6).map(|_| {
            let handle = handle.clone();
            Job::new(move || {
                let counter = Counter::new();
                handle.run_batch(&counter, (0..4).map(|_| Job::new(|| thread::yield_now())));
                handle.wait(&counter);
            })
        }),
    );
    scheduler.wait_async(&root);

    let capacity = scheduler.fiber_capacity();
    assert!(scheduler.idle_fibers() < capacity);
    scheduler.term().expect("Shutdown failed");

    // Workers give their current fiber back on exit.
    assert_eq!(handle.idle_fibers(), capacity);
}

#[test]
fn test_finished_wait_needs_no_spare_fiber() {
    // One fiber per worker: any wait that parks would exhaust the pool.
    let mut config = SchedulerConfig::with_workers(2, 1);
    config.fiber_pool_size = 2;
    config.fiber_stack_size = 128 * 1024;
    let scheduler = Scheduler::with_config(config).expect("scheduler should start");
    let handle = scheduler.handle();
    let returned = Arc::new(AtomicUsize::new(0));
    let returned_clone = returned.clone();

    let root = Counter::new();
    scheduler.run(
        &root,
        Job::new(move || {
            let counter = Counter::new();
            handle.run(&counter, Job::new(|| thread::sleep(Duration::from_millis(5))));
            while !counter.done() {
                thread::sleep(Duration::from_millis(1));
            }
            handle.wait(&counter);
            returned_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    scheduler.wait_async(&root);

    assert_eq!(returned.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.metrics().fibers_parked, 0);
    scheduler.term().expect("Shutdown failed");
}
