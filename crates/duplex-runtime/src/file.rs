//! Filesystem-facing file objects
//!
//! `OpenFile` is the reference-counted open file description a descriptor
//! table entry points at. Its behaviour comes from a `FileOps`
//! implementation; pipes and sockets are the two in this crate, other
//! kernel subsystems plug in their own.

use std::io::{IoSlice, IoSliceMut};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use duplex_core::error::{ChanError, ChanResult};
use duplex_core::flags::{MsgFlags, PollEvents, StatusFlags};

use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PipeReader,
    PipeWriter,
    Socket,
    Other,
}

/// Which direction of a socket `shutdown` closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Read,
    Write,
    Both,
}

/// Which buffer a capacity query or resize addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferSide {
    /// The buffer this file writes into
    Send,
    /// The buffer this file reads from
    Receive,
}

/// Outcome of a `recvmsg`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvResult {
    /// Normal bytes copied out
    pub bytes: usize,
    /// Bytes of the control buffer filled
    pub control_len: usize,
    /// `CTRUNC` when control data did not fit
    pub flags: MsgFlags,
}

/// Behaviour behind an open file description.
///
/// `nonblock` is the effective non-blocking mode of the call: the file's
/// status flag or a per-call `MSG_DONTWAIT`.
pub trait FileOps: Send + Sync {
    fn kind(&self) -> FileKind;

    fn readv(&self, task: &Task, iov: &mut [IoSliceMut<'_>], nonblock: bool) -> ChanResult<usize>;

    fn writev(&self, task: &Task, iov: &[IoSlice<'_>], nonblock: bool) -> ChanResult<usize>;

    fn poll(&self) -> PollEvents;

    /// About to be handed to another channel as control data
    fn pass(&self) -> ChanResult<()> {
        Ok(())
    }

    /// Hand-off finished or rolled back
    fn unpass(&self) {}

    fn sendmsg(
        &self,
        _task: &Task,
        _iov: &[IoSlice<'_>],
        _control: &[u8],
        _flags: MsgFlags,
        _nonblock: bool,
    ) -> ChanResult<usize> {
        Err(ChanError::NotSocket)
    }

    fn recvmsg(
        &self,
        _task: &Task,
        _iov: &mut [IoSliceMut<'_>],
        _control: &mut [u8],
        _flags: MsgFlags,
        _nonblock: bool,
    ) -> ChanResult<RecvResult> {
        Err(ChanError::NotSocket)
    }

    fn shutdown(&self, _how: Shutdown) -> ChanResult<()> {
        Err(ChanError::NotSocket)
    }

    fn sockatmark(&self) -> ChanResult<bool> {
        Err(ChanError::NotSocket)
    }

    /// Pending normal bytes readable without blocking
    fn bytes_available(&self) -> ChanResult<usize> {
        Err(ChanError::InvalidArgument("not a channel"))
    }

    fn capacity(&self, _side: BufferSide) -> ChanResult<usize> {
        Err(ChanError::InvalidArgument("not a channel"))
    }

    fn resize(&self, _side: BufferSide, _size: usize) -> ChanResult<usize> {
        Err(ChanError::InvalidArgument("not a channel"))
    }

    fn set_sigpipe(&self, _enabled: bool) -> ChanResult<()> {
        Err(ChanError::InvalidArgument("not a channel"))
    }
}

/// Open file description shared by every descriptor that refers to it
pub struct OpenFile {
    ops: Box<dyn FileOps>,
    status: AtomicU8,
}

impl OpenFile {
    pub fn new(ops: impl FileOps + 'static) -> Arc<Self> {
        Arc::new(Self {
            ops: Box::new(ops),
            status: AtomicU8::new(StatusFlags::empty().bits()),
        })
    }

    #[inline]
    pub fn ops(&self) -> &dyn FileOps {
        &*self.ops
    }

    #[inline]
    pub fn kind(&self) -> FileKind {
        self.ops.kind()
    }

    pub fn status_flags(&self) -> StatusFlags {
        StatusFlags::from_bits_truncate(self.status.load(Ordering::Acquire))
    }

    pub fn set_nonblocking(&self, enabled: bool) {
        if enabled {
            self.status.fetch_or(StatusFlags::NONBLOCK.bits(), Ordering::AcqRel);
        } else {
            self.status.fetch_and(!StatusFlags::NONBLOCK.bits(), Ordering::AcqRel);
        }
    }

    #[inline]
    pub fn is_nonblocking(&self) -> bool {
        self.status_flags().contains(StatusFlags::NONBLOCK)
    }

    pub fn read(&self, task: &Task, buf: &mut [u8]) -> ChanResult<usize> {
        self.readv(task, &mut [IoSliceMut::new(buf)])
    }

    pub fn write(&self, task: &Task, buf: &[u8]) -> ChanResult<usize> {
        self.writev(task, &[IoSlice::new(buf)])
    }

    pub fn readv(&self, task: &Task, iov: &mut [IoSliceMut<'_>]) -> ChanResult<usize> {
        check_iov_count(iov.len())?;
        self.ops.readv(task, iov, self.is_nonblocking())
    }

    pub fn writev(&self, task: &Task, iov: &[IoSlice<'_>]) -> ChanResult<usize> {
        check_iov_count(iov.len())?;
        self.ops.writev(task, iov, self.is_nonblocking())
    }

    pub fn send(&self, task: &Task, buf: &[u8], flags: MsgFlags) -> ChanResult<usize> {
        self.sendmsg(task, &[IoSlice::new(buf)], &[], flags)
    }

    pub fn recv(&self, task: &Task, buf: &mut [u8], flags: MsgFlags) -> ChanResult<usize> {
        self.recvmsg(task, &mut [IoSliceMut::new(buf)], &mut [], flags)
            .map(|r| r.bytes)
    }

    pub fn sendmsg(
        &self,
        task: &Task,
        iov: &[IoSlice<'_>],
        control: &[u8],
        flags: MsgFlags,
    ) -> ChanResult<usize> {
        if !MsgFlags::SEND_MASK.contains(flags) {
            return Err(ChanError::InvalidArgument("unsupported send flags"));
        }
        check_iov_count(iov.len())?;
        let nonblock = self.is_nonblocking() || flags.contains(MsgFlags::DONTWAIT);
        self.ops.sendmsg(task, iov, control, flags, nonblock)
    }

    pub fn recvmsg(
        &self,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        control: &mut [u8],
        flags: MsgFlags,
    ) -> ChanResult<RecvResult> {
        if !MsgFlags::RECV_MASK.contains(flags) {
            return Err(ChanError::InvalidArgument("unsupported recv flags"));
        }
        check_iov_count(iov.len())?;
        let nonblock = self.is_nonblocking() || flags.contains(MsgFlags::DONTWAIT);
        self.ops.recvmsg(task, iov, control, flags, nonblock)
    }

    #[inline]
    pub fn poll(&self) -> PollEvents {
        self.ops.poll()
    }

    #[inline]
    pub fn pass(&self) -> ChanResult<()> {
        self.ops.pass()
    }

    #[inline]
    pub fn unpass(&self) {
        self.ops.unpass()
    }

    pub fn shutdown(&self, how: Shutdown) -> ChanResult<()> {
        self.ops.shutdown(how)
    }

    pub fn sockatmark(&self) -> ChanResult<bool> {
        self.ops.sockatmark()
    }

    pub fn bytes_available(&self) -> ChanResult<usize> {
        self.ops.bytes_available()
    }

    pub fn capacity(&self, side: BufferSide) -> ChanResult<usize> {
        self.ops.capacity(side)
    }

    pub fn resize(&self, side: BufferSide, size: usize) -> ChanResult<usize> {
        self.ops.resize(side, size)
    }

    pub fn set_sigpipe(&self, enabled: bool) -> ChanResult<()> {
        self.ops.set_sigpipe(enabled)
    }
}

impl std::fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFile")
            .field("kind", &self.kind())
            .field("status", &self.status_flags())
            .finish()
    }
}

fn check_iov_count(count: usize) -> ChanResult<()> {
    if count > duplex_core::constants::IOV_MAX {
        Err(ChanError::InvalidArgument("too many iovecs"))
    } else {
        Ok(())
    }
}

/// Total length of a gather list
pub(crate) fn iov_len(iov: &[IoSlice<'_>]) -> usize {
    iov.iter().map(|s| s.len()).sum()
}

/// Total length of a scatter list
pub(crate) fn iov_len_mut(iov: &[IoSliceMut<'_>]) -> usize {
    iov.iter().map(|s| s.len()).sum()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    /// Inert file that counts pass/unpass calls and can refuse passing
    #[derive(Default)]
    pub struct Inert {
        pub passes: AtomicUsize,
        pub unpasses: AtomicUsize,
        pub refuse: bool,
    }

    impl FileOps for Inert {
        fn kind(&self) -> FileKind {
            FileKind::Other
        }

        fn readv(&self, _: &Task, _: &mut [IoSliceMut<'_>], _: bool) -> ChanResult<usize> {
            Ok(0)
        }

        fn writev(&self, _: &Task, iov: &[IoSlice<'_>], _: bool) -> ChanResult<usize> {
            Ok(iov_len(iov))
        }

        fn poll(&self) -> PollEvents {
            PollEvents::IN | PollEvents::OUT
        }

        fn pass(&self) -> ChanResult<()> {
            if self.refuse {
                return Err(ChanError::PermissionDenied);
            }
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unpass(&self) {
            self.unpasses.fetch_add(1, Ordering::SeqCst);
        }
    }
}
