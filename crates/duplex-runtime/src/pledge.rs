//! Pledges: who is about to make progress on each side of a channel
//!
//! A task blocked in a channel call holds a pledge for its side. A waiter
//! on the opposite side may yield to the most recent pledger instead of
//! sleeping blind. Pledges are hints; they never gate correctness.

use std::sync::atomic::{AtomicU32, Ordering};

use duplex_core::id::TaskId;

/// Direction a task uses a channel in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Read,
    Write,
}

impl Role {
    #[inline]
    pub fn opposite(self) -> Role {
        match self {
            Role::Read => Role::Write,
            Role::Write => Role::Read,
        }
    }
}

#[derive(Debug, Default)]
struct Pledge {
    count: AtomicU32,
    last: AtomicU32,
}

#[derive(Debug, Default)]
pub struct Pledges {
    read: Pledge,
    write: Pledge,
}

impl Pledges {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, role: Role) -> &Pledge {
        match role {
            Role::Read => &self.read,
            Role::Write => &self.write,
        }
    }

    /// Pledge `task` to `role` until the guard drops
    pub fn pledge(&self, role: Role, task: TaskId) -> PledgeGuard<'_> {
        let p = self.slot(role);
        p.last.store(task.as_u32(), Ordering::Release);
        p.count.fetch_add(1, Ordering::AcqRel);
        PledgeGuard { pledges: self, role }
    }

    #[inline]
    pub fn count(&self, role: Role) -> u32 {
        self.slot(role).count.load(Ordering::Acquire)
    }

    /// Most recent task pledged to `role`, while any pledge is held
    pub fn holder(&self, role: Role) -> Option<TaskId> {
        let p = self.slot(role);
        if p.count.load(Ordering::Acquire) == 0 {
            return None;
        }
        TaskId::new(p.last.load(Ordering::Acquire)).to_option()
    }
}

#[must_use]
pub struct PledgeGuard<'a> {
    pledges: &'a Pledges,
    role: Role,
}

impl Drop for PledgeGuard<'_> {
    fn drop(&mut self) {
        self.pledges.slot(self.role).count.fetch_sub(1, Ordering::AcqRel);
    }
}
