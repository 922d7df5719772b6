//! Directional endpoint
//!
//! An `Endpoint` binds one role of a shared `Channel` to its owner. The
//! channel lives as long as either endpoint; dropping an endpoint closes
//! its side, which wakes every waiter on the channel.

use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use duplex_core::cmsg::CmsgWriter;
use duplex_core::error::{ChanError, ChanResult};
use duplex_core::flags::{MsgFlags, PollEvents};
use duplex_core::kdebug;

use crate::channel::Channel;
use crate::config::ChannelConfig;
use crate::file::OpenFile;
use crate::pledge::Role;
use crate::task::Task;

pub struct Endpoint {
    channel: Arc<Channel>,
    role: Role,
    closed: AtomicBool,
}

impl Endpoint {
    /// Create a channel and return its `(reader, writer)` endpoints
    pub fn connect(config: &ChannelConfig) -> (Endpoint, Endpoint) {
        let channel = Channel::new(config);
        kdebug!("connect channel of {} bytes", channel.capacity());
        let reader = Endpoint::new(Arc::clone(&channel), Role::Read);
        let writer = Endpoint::new(channel, Role::Write);
        (reader, writer)
    }

    fn new(channel: Arc<Channel>, role: Role) -> Self {
        Self {
            channel,
            role,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn expect_role(&self, role: Role) -> ChanResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(ChanError::BadDescriptor)
        }
    }

    /// Read side only. A closed endpoint reads as end of stream.
    pub fn recv(
        &self,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        control: Option<&mut CmsgWriter<'_>>,
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        self.expect_role(Role::Read)?;
        if self.is_closed() {
            return Ok(0);
        }
        self.channel.recv(task, iov, control, flags, nonblock)
    }

    /// Write side only. A closed endpoint behaves like a vanished reader.
    pub fn send(
        &self,
        task: &Task,
        iov: &[IoSlice<'_>],
        rights: &[Vec<Arc<OpenFile>>],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        self.expect_role(Role::Write)?;
        if self.is_closed() {
            if self.channel.sigpipe_enabled() && !flags.contains(MsgFlags::NOSIGNAL) {
                task.signals().raise(duplex_core::constants::SIGPIPE);
            }
            return Err(ChanError::BrokenPipe);
        }
        self.channel.send(task, iov, rights, flags, nonblock)
    }

    pub fn poll(&self) -> PollEvents {
        if self.is_closed() {
            return match self.role {
                Role::Read => PollEvents::HUP,
                Role::Write => PollEvents::ERR,
            };
        }
        self.channel.poll(self.role)
    }

    /// This endpoint is about to travel as control data.
    ///
    /// Fails with `EPERM` while its channel holds descriptors in flight.
    pub fn pass(&self) -> ChanResult<()> {
        self.channel.mark_passed().map_err(|err| {
            kdebug!("endpoint ({:?}) refused pass: descriptors pending", self.role);
            err
        })
    }

    pub fn unpass(&self) {
        self.channel.unmark_passed();
    }

    /// Ask for a new ring size; only the writer's request takes effect
    pub fn resize(&self, size: usize) -> usize {
        self.channel.resize(self.role, size)
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    pub fn bytes_available(&self) -> usize {
        if self.role == Role::Read && !self.is_closed() {
            self.channel.bytes_available()
        } else {
            0
        }
    }

    pub fn sockatmark(&self) -> bool {
        self.role == Role::Read && self.channel.sockatmark()
    }

    /// Close this side once; later calls do nothing
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.channel.close(self.role);
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}
