//! OS thread placement: priority levels and core pinning.
//!
//! Both are best-effort. A worker that cannot be pinned or re-prioritized
//! still runs, it just runs wherever and however the OS decides.

use crate::PinningStrategy;
use serde::{Deserialize, Serialize};

/// Scheduling priority requested for a worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadPriority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl ThreadPriority {
    /// Nice value used on Unix-like systems. Lower is more favorable.
    pub fn nice_value(self) -> i32 {
        match self {
            ThreadPriority::Lowest => 10,
            ThreadPriority::Low => 5,
            ThreadPriority::Normal => 0,
            ThreadPriority::High => -5,
            ThreadPriority::Highest => -10,
        }
    }
}

/// Applies `priority` to the calling thread. Returns whether the OS accepted it.
///
/// Raising priority above normal usually needs `CAP_SYS_NICE`; without it the
/// request is refused and the thread keeps its inherited priority.
pub(crate) fn set_current_priority(priority: ThreadPriority) -> bool {
    if priority == ThreadPriority::Normal {
        return true;
    }
    apply_nice(priority.nice_value())
}

#[cfg(target_os = "linux")]
fn apply_nice(nice: i32) -> bool {
    // SAFETY: gettid has no preconditions; setpriority on our own tid only
    // touches this thread's scheduling attributes.
    unsafe {
        let tid = libc::gettid();
        libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice) == 0
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_nice(_nice: i32) -> bool {
    false
}

/// Picks the logical core for worker `index` out of `num_cores`.
pub(crate) fn core_slot(strategy: PinningStrategy, index: usize, num_cores: usize) -> Option<usize> {
    if num_cores == 0 {
        return None;
    }
    match strategy {
        PinningStrategy::None => None,
        PinningStrategy::Linear => Some(index % num_cores),
        PinningStrategy::AvoidSMT => {
            // Even slots first; once those run out, spill onto the SMT siblings.
            let doubled = index * 2;
            Some((doubled % num_cores + (doubled / num_cores) % 2) % num_cores)
        }
    }
}

/// Pins the calling thread according to `strategy`. Returns the chosen core.
pub(crate) fn pin_current(strategy: PinningStrategy, index: usize) -> Option<usize> {
    if strategy == PinningStrategy::None {
        return None;
    }
    let core_ids = core_affinity::get_core_ids()?;
    let slot = core_slot(strategy, index, core_ids.len())?;
    core_affinity::set_for_current(core_ids[slot]).then_some(slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_slots_wrap() {
        assert_eq!(core_slot(PinningStrategy::Linear, 0, 4), Some(0));
        assert_eq!(core_slot(PinningStrategy::Linear, 3, 4), Some(3));
        assert_eq!(core_slot(PinningStrategy::Linear, 5, 4), Some(1));
    }

    #[test]
    fn test_avoid_smt_prefers_even_slots() {
        let slots: Vec<_> = (0..8)
            .map(|i| core_slot(PinningStrategy::AvoidSMT, i, 8).unwrap())
            .collect();
        assert_eq!(&slots[..4], &[0, 2, 4, 6]);
        assert_eq!(&slots[4..], &[1, 3, 5, 7]);
    }

    #[test]
    fn test_no_pinning() {
        assert_eq!(core_slot(PinningStrategy::None, 1, 8), None);
        assert_eq!(core_slot(PinningStrategy::Linear, 1, 0), None);
    }

    #[test]
    fn test_normal_priority_is_noop() {
        assert!(set_current_priority(ThreadPriority::Normal));
        assert_eq!(ThreadPriority::default(), ThreadPriority::Normal);
        assert!(ThreadPriority::High.nice_value() < ThreadPriority::Low.nice_value());
    }
}
