//! # duplex - pipes and socket pairs over a shared channel engine
//!
//! A channel is a bounded byte stream between tasks that can also carry
//! open files (`SCM_RIGHTS`). Pipes use one channel; a connected socket
//! pair uses two, crossed over.
//!
//! ## Quick Start
//!
//! ```ignore
//! use duplex::{socketpair, CmsgBuilder, FdFlags, FdTable, MsgFlags, PendingSignals, Task};
//! use std::io::{IoSlice, IoSliceMut};
//! use std::sync::Arc;
//!
//! let fds = Arc::new(FdTable::default());
//! let task = Task::new(fds.clone(), Arc::new(PendingSignals::new()));
//! let (a, b) = socketpair();
//!
//! // Pass the read end of a pipe across the socket
//! let (rd, _wr) = duplex::pipe();
//! let fd = fds.insert(rd, FdFlags::empty())?;
//! let control = CmsgBuilder::new().rights(&[fd]).build();
//! a.sendmsg(&task, &[IoSlice::new(b"take this")], &control, MsgFlags::empty())?;
//!
//! let mut buf = [0u8; 16];
//! let mut cbuf = [0u8; 64];
//! let got = b.recvmsg(&task, &mut [IoSliceMut::new(&mut buf)], &mut cbuf, MsgFlags::empty())?;
//! let received = duplex::parse_rights(&cbuf[..got.control_len])?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      OpenFile                               │
//! │          read / write / sendmsg / recvmsg / poll            │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!         ┌──────────────┐              ┌──────────────────┐
//!         │   PipeEnd    │              │    SocketEnd     │
//!         │ one Endpoint │              │  rx + tx Endpoint│
//!         └──────────────┘              └──────────────────┘
//!                 │                              │
//!                 └──────────────┬───────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Channel                                │
//! │   segment queue over a ring, pledges, pass counters         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Environment Variables
//!
//! - `DUPLEX_BUFFER_SIZE`, `DUPLEX_MIN_BUFFER_SIZE`, `DUPLEX_MAX_BUFFER_SIZE` - ring sizes (`K`/`M` suffixes)
//! - `DUPLEX_WAIT_SLICE_MS` - longest single sleep before a blocked call re-checks its interrupt
//! - `DUPLEX_SIGPIPE` - raise SIGPIPE on writes to a closed channel
//! - `DUPLEX_YIELD_HINT` - yield to the peer once before sleeping
//! - `DUPLEX_LOG_LEVEL`, `DUPLEX_FLUSH_EPRINT` - logging

use std::sync::Arc;

// Re-export core types
pub use duplex_core::{
    ChanError,
    ChanResult,
    CmsgBuilder,
    CmsgIter,
    CmsgWriter,
    FdFlags,
    Interrupt,
    MsgFlags,
    PollEvents,
    StatusFlags,
    TaskId,
};
pub use duplex_core::cmsg::{cmsg_space, parse_rights, rights_space};

// Re-export kprint macros
pub use duplex_core::{kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use duplex_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use duplex_core::{env_get, env_get_bool, env_get_opt, env_get_size, env_get_str, env_is_set};

// Re-export runtime types
pub use duplex_runtime::{
    BufferSide,
    Channel,
    ChannelConfig,
    ConfigError,
    DescriptorTable,
    Endpoint,
    FdTable,
    FileKind,
    FileOps,
    OpenFile,
    PendingSignals,
    RecvResult,
    Role,
    Shutdown,
    Task,
};

/// Configuration used by [`pipe`] and [`socketpair`]
///
/// Read from the environment. An invalid combination is reported and
/// replaced by the built-in defaults.
pub fn config() -> ChannelConfig {
    let config = ChannelConfig::from_env();
    match config.validate() {
        Ok(()) => config,
        Err(e) => {
            kwarn!("ignoring channel configuration from environment: {}", e);
            ChannelConfig::new()
        }
    }
}

/// Create a pipe, returning `(reader, writer)`
pub fn pipe() -> (Arc<OpenFile>, Arc<OpenFile>) {
    duplex_runtime::pipe(&config())
}

/// Create a connected pair of stream sockets
pub fn socketpair() -> (Arc<OpenFile>, Arc<OpenFile>) {
    duplex_runtime::socketpair(&config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_round_trip() {
        let task = Task::standalone();
        let (rd, wr) = pipe();
        assert_eq!(rd.kind(), FileKind::PipeReader);
        assert_eq!(wr.kind(), FileKind::PipeWriter);
        assert_eq!(wr.write(&task, b"hello"), Ok(5));
        let mut buf = [0u8; 8];
        assert_eq!(rd.read(&task, &mut buf), Ok(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_socketpair_is_bidirectional() {
        let task = Task::standalone();
        let (a, b) = socketpair();
        assert_eq!(a.kind(), FileKind::Socket);
        a.write(&task, b"ping").unwrap();
        b.write(&task, b"pong").unwrap();
        let mut buf = [0u8; 4];
        b.read(&task, &mut buf).unwrap();
        assert_eq!(&buf, b"ping");
        a.read(&task, &mut buf).unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[test]
    fn test_config_is_valid() {
        assert!(config().validate().is_ok());
    }
}
