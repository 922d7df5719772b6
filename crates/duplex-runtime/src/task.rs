//! Calling-task context
//!
//! Every channel operation runs on behalf of a task. The task supplies the
//! descriptor table passed files land in, the sink SIGPIPE goes to, the
//! interrupt that cuts a blocking wait short, and the scheduling hint used
//! while waiting.

use std::sync::Arc;

use duplex_core::id::TaskId;
use duplex_core::interrupt::Interrupt;
use duplex_core::traits::{SchedHint, SignalSink};

use crate::fdtable::{DescriptorTable, FdTable};
use crate::hint::YieldHint;
use crate::signal::PendingSignals;

#[derive(Clone)]
pub struct Task {
    id: TaskId,
    fds: Arc<dyn DescriptorTable>,
    signals: Arc<dyn SignalSink>,
    interrupt: Interrupt,
    hint: Arc<dyn SchedHint>,
}

impl Task {
    /// Task for the calling thread
    pub fn new(fds: Arc<dyn DescriptorTable>, signals: Arc<dyn SignalSink>) -> Self {
        Self {
            id: TaskId::current(),
            fds,
            signals,
            interrupt: Interrupt::new(),
            hint: Arc::new(YieldHint),
        }
    }

    /// Task with its own empty descriptor table and signal queue
    pub fn standalone() -> Self {
        Self::new(Arc::new(FdTable::default()), Arc::new(PendingSignals::new()))
    }

    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_hint(mut self, hint: Arc<dyn SchedHint>) -> Self {
        self.hint = hint;
        self
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn fds(&self) -> &dyn DescriptorTable {
        &*self.fds
    }

    #[inline]
    pub fn signals(&self) -> &dyn SignalSink {
        &*self.signals
    }

    #[inline]
    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    #[inline]
    pub fn hint(&self) -> &dyn SchedHint {
        &*self.hint
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("interrupt", &self.interrupt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hint::NoHint;

    #[test]
    fn test_builder_overrides() {
        let interrupt = Interrupt::new();
        let task = Task::standalone()
            .with_id(TaskId::new(9))
            .with_interrupt(interrupt.clone())
            .with_hint(Arc::new(NoHint));
        assert_eq!(task.id(), TaskId::new(9));
        interrupt.raise();
        assert!(task.interrupt().is_raised());
    }

    #[test]
    fn test_shared_signal_sink() {
        let signals = Arc::new(PendingSignals::new());
        let task = Task::new(Arc::new(FdTable::new(4)), signals.clone());
        task.signals().raise(libc::SIGPIPE);
        assert_eq!(signals.take(), Some(libc::SIGPIPE));
    }
}
