//! Scheduling hints for blocked channel waiters
//!
//! A task about to sleep on a channel whose opposite side has a pledged
//! task may first hand the CPU over. Both implementations are advisory;
//! swapping one for the other changes only wakeup latency.

use duplex_core::id::TaskId;
use duplex_core::traits::SchedHint;

/// Ignores the hint
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHint;

impl SchedHint for NoHint {
    #[inline]
    fn yield_to(&self, _target: TaskId) {}
}

/// Yields the calling OS thread.
///
/// The host scheduler has no directed hand-off, so the target only gets
/// a better chance of running next.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldHint;

impl SchedHint for YieldHint {
    fn yield_to(&self, target: TaskId) {
        if target.is_none() || target == TaskId::current() {
            return;
        }
        platform_yield();
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        fn platform_yield() {
            if nix::sched::sched_yield().is_err() {
                std::thread::yield_now();
            }
        }
    } else {
        fn platform_yield() {
            std::thread::yield_now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_return() {
        NoHint.yield_to(TaskId::new(1));
        YieldHint.yield_to(TaskId::new(1));
        YieldHint.yield_to(TaskId::NONE);
        YieldHint.yield_to(TaskId::current());
    }

    #[test]
    fn test_usable_as_trait_object() {
        let hints: Vec<Box<dyn SchedHint>> = vec![Box::new(NoHint), Box::new(YieldHint)];
        for h in &hints {
            h.yield_to(TaskId::new(7));
        }
    }
}
