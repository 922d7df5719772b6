//! Anonymous pipes
//!
//! A pipe is one channel with its reader and writer wrapped as separate
//! open files. Pipes carry bytes only; control data is rejected.

use std::io::{IoSlice, IoSliceMut};
use std::sync::Arc;

use duplex_core::error::{ChanError, ChanResult};
use duplex_core::flags::{MsgFlags, PollEvents};

use crate::config::ChannelConfig;
use crate::endpoint::Endpoint;
use crate::file::{BufferSide, FileKind, FileOps, OpenFile, RecvResult};
use crate::pledge::Role;
use crate::task::Task;

/// One end of a pipe
#[derive(Debug)]
pub struct PipeEnd {
    endpoint: Endpoint,
}

impl PipeEnd {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Create a pipe and return its `(read end, write end)`
pub fn pipe(config: &ChannelConfig) -> (Arc<OpenFile>, Arc<OpenFile>) {
    let (reader, writer) = Endpoint::connect(config);
    (
        OpenFile::new(PipeEnd { endpoint: reader }),
        OpenFile::new(PipeEnd { endpoint: writer }),
    )
}

impl FileOps for PipeEnd {
    fn kind(&self) -> FileKind {
        match self.endpoint.role() {
            Role::Read => FileKind::PipeReader,
            Role::Write => FileKind::PipeWriter,
        }
    }

    fn readv(&self, task: &Task, iov: &mut [IoSliceMut<'_>], nonblock: bool) -> ChanResult<usize> {
        self.endpoint.recv(task, iov, None, MsgFlags::empty(), nonblock)
    }

    fn writev(&self, task: &Task, iov: &[IoSlice<'_>], nonblock: bool) -> ChanResult<usize> {
        self.endpoint.send(task, iov, &[], MsgFlags::empty(), nonblock)
    }

    fn poll(&self) -> PollEvents {
        self.endpoint.poll()
    }

    fn pass(&self) -> ChanResult<()> {
        self.endpoint.pass()
    }

    fn unpass(&self) {
        self.endpoint.unpass()
    }

    fn sendmsg(
        &self,
        task: &Task,
        iov: &[IoSlice<'_>],
        control: &[u8],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<usize> {
        if !control.is_empty() {
            return Err(ChanError::InvalidArgument("pipes carry no control data"));
        }
        self.endpoint.send(task, iov, &[], flags, nonblock)
    }

    fn recvmsg(
        &self,
        task: &Task,
        iov: &mut [IoSliceMut<'_>],
        _control: &mut [u8],
        flags: MsgFlags,
        nonblock: bool,
    ) -> ChanResult<RecvResult> {
        let bytes = self.endpoint.recv(task, iov, None, flags, nonblock)?;
        Ok(RecvResult { bytes, ..RecvResult::default() })
    }

    fn bytes_available(&self) -> ChanResult<usize> {
        Ok(self.endpoint.bytes_available())
    }

    fn capacity(&self, _side: BufferSide) -> ChanResult<usize> {
        Ok(self.endpoint.capacity())
    }

    fn resize(&self, _side: BufferSide, size: usize) -> ChanResult<usize> {
        Ok(self.endpoint.resize(size))
    }

    fn set_sigpipe(&self, enabled: bool) -> ChanResult<()> {
        self.endpoint.channel().set_sigpipe(enabled);
        Ok(())
    }
}
