//! # duplex-runtime
//!
//! The channel engine and the file objects built on it.
//!
//! This crate provides:
//! - `Channel`: one direction of data with backpressure and descriptor passing
//! - `Endpoint`: a read or write handle onto a channel
//! - Pipes and connected Unix-domain socket pairs as open files
//! - A per-task descriptor table, signal sink and scheduling hint
//! - Runtime configuration from environment variables
//!
//! ```ignore
//! use duplex_runtime::{pipe, ChannelConfig, Task};
//!
//! let task = Task::standalone();
//! let (rd, wr) = pipe(&ChannelConfig::default());
//! wr.write(&task, b"hello")?;
//! let mut buf = [0u8; 5];
//! rd.read(&task, &mut buf)?;
//! ```

pub mod config;
pub mod hint;
pub mod signal;
pub mod file;
pub mod fdtable;
pub mod task;
pub mod pledge;
pub mod channel;
pub mod endpoint;
pub mod pipe;
pub mod socket;

// Re-exports
pub use config::{ChannelConfig, ConfigError};
pub use hint::{NoHint, YieldHint};
pub use signal::{signal_name, PendingSignals};
pub use file::{BufferSide, FileKind, FileOps, OpenFile, RecvResult, Shutdown};
pub use fdtable::{DescriptorTable, FdTable, Reservation};
pub use task::Task;
pub use pledge::{PledgeGuard, Pledges, Role};
pub use channel::Channel;
pub use endpoint::Endpoint;
pub use pipe::{pipe, PipeEnd};
pub use socket::{socketpair, SocketEnd};
