//! Task identifier type
//!
//! A `TaskId` names the thread performing a channel call. The backpressure
//! layer records it when a thread pledges to read or write so the opposite
//! side can hand its time slice to that specific thread.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use std::cell::Cell;

/// Next id handed out by `TaskId::current()`; 0 is never issued.
static NEXT_TASK_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT_TASK: Cell<u32> = const { Cell::new(u32::MAX) };
}

/// Identifier of a thread issuing channel operations
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TaskId(u32);

impl TaskId {
    /// Sentinel value meaning "no task"
    pub const NONE: TaskId = TaskId(u32::MAX);

    #[inline]
    pub const fn new(id: u32) -> Self {
        TaskId(id)
    }

    /// Id of the calling OS thread, assigned lazily on first use
    pub fn current() -> Self {
        CURRENT_TASK.with(|cell| {
            let id = cell.get();
            if id != u32::MAX {
                return TaskId(id);
            }
            let fresh = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);
            cell.set(fresh);
            TaskId(fresh)
        })
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    pub const fn to_option(self) -> Option<TaskId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "TaskId(NONE)")
        } else {
            write!(f, "TaskId({})", self.0)
        }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl Default for TaskId {
    fn default() -> Self {
        TaskId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_is_stable_per_thread() {
        let a = TaskId::current();
        let b = TaskId::current();
        assert_eq!(a, b);
        assert!(!a.is_none());
    }

    #[test]
    fn test_current_differs_across_threads() {
        let here = TaskId::current();
        let there = std::thread::spawn(TaskId::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_none_sentinel() {
        assert!(TaskId::NONE.is_none());
        assert_eq!(TaskId::NONE.to_option(), None);
        assert_eq!(TaskId::new(3).to_option(), Some(TaskId::new(3)));
        assert_eq!(format!("{}", TaskId::NONE), "none");
    }
}
