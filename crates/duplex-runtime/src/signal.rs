//! Process-local signal delivery
//!
//! `PendingSignals` stands in for a process's pending-signal set: the
//! channel raises SIGPIPE into it and the owner drains it at its next
//! safe point.

use crossbeam_queue::SegQueue;

use duplex_core::kdebug;
use duplex_core::traits::SignalSink;

/// Lock-free queue of raised signal numbers
#[derive(Debug, Default)]
pub struct PendingSignals {
    queue: SegQueue<i32>,
}

impl PendingSignals {
    pub fn new() -> Self {
        Self { queue: SegQueue::new() }
    }

    /// Oldest pending signal, if any
    pub fn take(&self) -> Option<i32> {
        self.queue.pop()
    }

    /// Remove and return every pending signal, oldest first
    pub fn drain(&self) -> Vec<i32> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Whether `signal` is pending; consumes nothing
    pub fn is_pending(&self, signal: i32) -> bool {
        // SegQueue has no iterator; rotate through a snapshot of its length
        let mut found = false;
        for _ in 0..self.queue.len() {
            if let Some(s) = self.queue.pop() {
                found |= s == signal;
                self.queue.push(s);
            }
        }
        found
    }
}

impl SignalSink for PendingSignals {
    fn raise(&self, signal: i32) {
        kdebug!("raise {}", signal_name(signal));
        self.queue.push(signal);
    }
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Human-readable signal name for log lines
        pub fn signal_name(signal: i32) -> String {
            match nix::sys::signal::Signal::try_from(signal) {
                Ok(sig) => sig.as_str().to_string(),
                Err(_) => format!("signal {}", signal),
            }
        }
    } else {
        pub fn signal_name(signal: i32) -> String {
            format!("signal {}", signal)
        }
    }
}
