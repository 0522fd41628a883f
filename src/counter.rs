//! Counter-based synchronization primitives for job completion tracking.
//!
//! A [`Counter`] tracks the outstanding jobs of one fan-out and admits a
//! single waiter: either a parked job fiber or a blocked OS thread, never
//! both. An [`IoCounter`] only tracks outstanding IO tasks and is polled.
//!
//! Both 64-bit words of a counter pack a 32-bit epoch in the high half. The
//! epoch is bumped by every `run`, so a completion only ever wakes a waiter
//! registered for the same fan-out.

use crate::fiber::{Fiber, FiberHandle};
use crossbeam::sync::Unparker;
use parking_lot::Mutex;
use std::fmt;
use std::hint;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

const WAIT_NONE: u32 = 0;
/// A fiber claimed the slot but is still running on its worker.
const WAIT_FIBER_PARKING: u32 = 1;
/// The fiber has fully suspended and may be resumed by the completing job.
const WAIT_FIBER_PARKED: u32 = 2;
const WAIT_THREAD: u32 = 3;

#[inline]
fn pack(epoch: u32, low: u32) -> u64 {
    (u64::from(epoch) << 32) | u64::from(low)
}

#[inline]
fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

struct CounterInner {
    /// epoch | outstanding count
    state: AtomicU64,
    /// epoch | waiter state
    waiter: AtomicU64,
    wait_fiber: AtomicPtr<Fiber>,
    wait_thread: Mutex<Option<Unparker>>,
}

/// Tracks the outstanding jobs of a fan-out submitted with
/// [`SchedulerHandle::run`](crate::SchedulerHandle::run) or
/// [`SchedulerHandle::run_batch`](crate::SchedulerHandle::run_batch).
///
/// Cloning is cheap and every clone refers to the same counter.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    /// Creates an idle counter with no outstanding work.
    pub fn new() -> Self {
        Counter {
            inner: Arc::new(CounterInner {
                state: AtomicU64::new(0),
                waiter: AtomicU64::new(0),
                wait_fiber: AtomicPtr::new(ptr::null_mut()),
                wait_thread: Mutex::new(None),
            }),
        }
    }

    /// Number of jobs still outstanding.
    pub fn count(&self) -> u32 {
        unpack(self.inner.state.load(Ordering::Acquire)).1
    }

    /// Checks if all submitted jobs have completed.
    pub fn done(&self) -> bool {
        self.count() == 0
    }

    /// Clears any waiter registration.
    ///
    /// # Panics
    ///
    /// Panics if jobs are still outstanding.
    pub fn reset(&self) {
        let (epoch, count) = unpack(self.inner.state.load(Ordering::SeqCst));
        if count != 0 {
            fatal!("cannot reset a counter with active jobs");
        }
        self.inner.wait_thread.lock().take();
        self.inner
            .wait_fiber
            .store(ptr::null_mut(), Ordering::Relaxed);
        self.inner
            .waiter
            .store(pack(epoch, WAIT_NONE), Ordering::SeqCst);
    }

    /// Starts a new fan-out of `jobs` outstanding jobs.
    pub(crate) fn begin(&self, jobs: u32) {
        let current = self.inner.state.load(Ordering::SeqCst);
        let (epoch, count) = unpack(current);
        if count != 0 {
            fatal!("job counter is not empty");
        }
        let started = self.inner.state.compare_exchange(
            current,
            pack(epoch.wrapping_add(1), jobs),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        if started.is_err() {
            fatal!("job counter submitted concurrently");
        }
    }

    /// Records one finished job.
    ///
    /// When this was the last outstanding job, a waiting OS thread is
    /// signaled directly and a parked fiber is handed back for the caller
    /// to resume.
    pub(crate) fn complete_one(&self) -> Option<FiberHandle> {
        let previous = self.inner.state.fetch_sub(1, Ordering::SeqCst);
        let (epoch, count) = unpack(previous);
        if count == 0 {
            fatal!("counter decremented below zero");
        }
        if count != 1 {
            return None;
        }
        self.wake(epoch)
    }

    fn wake(&self, epoch: u32) -> Option<FiberHandle> {
        loop {
            let (waiter_epoch, state) = unpack(self.inner.waiter.load(Ordering::SeqCst));
            if waiter_epoch != epoch {
                return None;
            }
            match state {
                // Bounded by the parking fiber's switch to a fresh fiber.
                WAIT_FIBER_PARKING => hint::spin_loop(),
                WAIT_FIBER_PARKED => {
                    let fiber = self.inner.wait_fiber.load(Ordering::Acquire);
                    return FiberHandle::from_ptr(fiber);
                }
                WAIT_THREAD => {
                    let unparker = self.inner.wait_thread.lock().clone();
                    if let Some(unparker) = unparker {
                        unparker.unpark();
                    }
                    return None;
                }
                _ => return None,
            }
        }
    }

    /// Whether the fan-out identified by `epoch` has finished.
    pub(crate) fn done_since(&self, epoch: u32) -> bool {
        let (current, count) = unpack(self.inner.state.load(Ordering::SeqCst));
        current != epoch || count == 0
    }

    /// Claims the waiter slot for a fiber. Returns the claimed epoch, or
    /// `None` when another waiter already holds the slot.
    pub(crate) fn claim_fiber_wait(&self) -> Option<u32> {
        self.claim(WAIT_FIBER_PARKING)
    }

    /// Releases a claim made by a fiber that found the work already done.
    pub(crate) fn abandon_fiber_wait(&self, epoch: u32) {
        self.inner
            .waiter
            .store(pack(epoch, WAIT_NONE), Ordering::SeqCst);
    }

    /// Publishes the fiber that is about to park on this counter.
    pub(crate) fn publish_fiber(&self, fiber: FiberHandle) {
        self.inner
            .wait_fiber
            .store(fiber.as_ptr(), Ordering::Release);
    }

    /// Marks the parked fiber as fully suspended. Called from the fiber that
    /// replaced it on its worker.
    pub(crate) fn mark_fiber_parked(&self, epoch: u32) {
        self.inner
            .waiter
            .store(pack(epoch, WAIT_FIBER_PARKED), Ordering::SeqCst);
    }

    /// Clears the slot after the parked fiber was resumed.
    pub(crate) fn finish_fiber_wait(&self, epoch: u32) {
        self.inner
            .wait_fiber
            .store(ptr::null_mut(), Ordering::Relaxed);
        self.inner
            .waiter
            .store(pack(epoch, WAIT_NONE), Ordering::SeqCst);
    }

    /// Registers an OS thread waiter. Returns the claimed epoch, or `None`
    /// when another waiter already holds the slot.
    pub(crate) fn register_thread(&self, unparker: Unparker) -> Option<u32> {
        let epoch = self.claim(WAIT_THREAD)?;
        *self.inner.wait_thread.lock() = Some(unparker);
        Some(epoch)
    }

    pub(crate) fn unregister_thread(&self, epoch: u32) {
        self.inner.wait_thread.lock().take();
        let cleared = self.inner.waiter.compare_exchange(
            pack(epoch, WAIT_THREAD),
            pack(epoch, WAIT_NONE),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        debug_assert!(
            cleared.is_ok(),
            "thread waiter slot of epoch {epoch} was overwritten"
        );
    }

    fn claim(&self, state: u32) -> Option<u32> {
        let (epoch, _) = unpack(self.inner.state.load(Ordering::SeqCst));
        let current = self.inner.waiter.load(Ordering::SeqCst);
        if unpack(current).1 != WAIT_NONE {
            return None;
        }
        self.inner
            .waiter
            .compare_exchange(
                current,
                pack(epoch, state),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| epoch)
    }

    #[cfg(test)]
    fn has_waiter(&self) -> bool {
        unpack(self.inner.waiter.load(Ordering::SeqCst)).1 != WAIT_NONE
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (epoch, count) = unpack(self.inner.state.load(Ordering::Relaxed));
        f.debug_struct("Counter")
            .field("epoch", &epoch)
            .field("count", &count)
            .finish()
    }
}

/// Tracks outstanding IO tasks. Polled with [`IoCounter::done`]; there is no
/// way to block on it.
#[derive(Clone, Debug, Default)]
pub struct IoCounter {
    count: Arc<AtomicU32>,
}

impl IoCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of IO tasks still outstanding.
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn done(&self) -> bool {
        self.count() == 0
    }

    pub(crate) fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn decrement(&self) {
        let previous = self.count.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            fatal!("IO counter decremented below zero");
        }
    }
}
