//! Interrupt token for blocking channel calls
//!
//! A blocked `send`/`recv` polls its task's token between sleeps. A raised
//! token ends the wait with `EINTR`, or with the partial count if bytes
//! already moved. Tokens can be chained so that raising a process-wide
//! token interrupts every task derived from it.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use crate::error::{ChanError, ChanResult};

/// Cloneable handle to an interruption flag
#[derive(Clone)]
pub struct Interrupt {
    inner: Option<Arc<InterruptInner>>,
}

struct InterruptInner {
    raised: AtomicBool,
    parent: Option<Interrupt>,
}

impl Interrupt {
    /// Create an independent token
    pub fn new() -> Self {
        Self {
            inner: Some(Arc::new(InterruptInner {
                raised: AtomicBool::new(false),
                parent: None,
            })),
        }
    }

    /// Token that is never raised (kernel-internal callers)
    pub fn never() -> Self {
        Self { inner: None }
    }

    /// Token that also reports raised whenever `self` is raised
    pub fn child(&self) -> Self {
        Self {
            inner: Some(Arc::new(InterruptInner {
                raised: AtomicBool::new(false),
                parent: Some(self.clone()),
            })),
        }
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        match &self.inner {
            Some(inner) => {
                inner.raised.load(Ordering::Acquire)
                    || inner.parent.as_ref().map_or(false, Interrupt::is_raised)
            }
            None => false,
        }
    }

    /// Deliver an interruption; only this token's own flag is set
    pub fn raise(&self) {
        if let Some(inner) = &self.inner {
            inner.raised.store(true, Ordering::Release);
        }
    }

    /// Acknowledge a delivered interruption
    pub fn clear(&self) {
        if let Some(inner) = &self.inner {
            inner.raised.store(false, Ordering::Release);
        }
    }

    /// `Err(Interrupted)` when raised
    #[inline]
    pub fn check(&self) -> ChanResult<()> {
        if self.is_raised() {
            Err(ChanError::Interrupted)
        } else {
            Ok(())
        }
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_clear() {
        let token = Interrupt::new();
        assert!(token.check().is_ok());
        token.raise();
        assert_eq!(token.check(), Err(ChanError::Interrupted));
        token.clear();
        assert!(!token.is_raised());
    }

    #[test]
    fn test_parent_reaches_child() {
        let process = Interrupt::new();
        let task = process.child();
        process.raise();
        assert!(task.is_raised());
        process.clear();
        assert!(!task.is_raised());
    }

    #[test]
    fn test_child_does_not_reach_parent() {
        let process = Interrupt::new();
        let task = process.child();
        task.raise();
        assert!(!process.is_raised());
    }

    #[test]
    fn test_clones_share_flag() {
        let a = Interrupt::new();
        let b = a.clone();
        a.raise();
        assert!(b.is_raised());
    }

    #[test]
    fn test_never_ignores_raise() {
        let token = Interrupt::never();
        token.raise();
        assert!(!token.is_raised());
    }
}
