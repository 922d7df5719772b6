//! Seams between the channel engine and the rest of the kernel
//!
//! The engine never talks to a scheduler or a signal subsystem directly.
//! Runtimes provide these traits; `duplex-runtime` ships process-local
//! implementations used by the tests and the command-line tools.

use crate::id::TaskId;

/// Delivers asynchronous signals to the calling task
pub trait SignalSink: Send + Sync {
    /// Queue `signal` (a libc signal number) for the current task
    fn raise(&self, signal: i32);
}

/// Scheduling hint used while a task waits on a channel
pub trait SchedHint: Send + Sync {
    /// Give the CPU to `target`, which has pledged to make progress on the
    /// opposite side. Advisory: returning immediately is always correct.
    fn yield_to(&self, target: TaskId);
}

impl<S: SignalSink + ?Sized> SignalSink for std::sync::Arc<S> {
    fn raise(&self, signal: i32) {
        (**self).raise(signal)
    }
}

impl<H: SchedHint + ?Sized> SchedHint for std::sync::Arc<H> {
    fn yield_to(&self, target: TaskId) {
        (**self).yield_to(target)
    }
}
