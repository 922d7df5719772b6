//! # duplex-core
//!
//! Building blocks for the kernel's bidirectional data channel, the
//! primitive behind pipes and Unix-domain sockets.
//!
//! This crate holds the platform-agnostic pieces: byte storage, the
//! segment and control-message codecs, flags, errors and the traits a
//! runtime implements. The channel engine itself lives in
//! `duplex-runtime`.
//!
//! ## Modules
//!
//! - `ring` - Circular byte buffer
//! - `segment` - Segment headers and the segment queue
//! - `cmsg` - User control-message layout and ring records
//! - `token` - Ownership tokens for references parked in the ring
//! - `flags` - Message, poll, descriptor and status flags
//! - `id` - Task identifier
//! - `interrupt` - Interrupt token for blocking calls
//! - `error` - Error type and errno mapping
//! - `spinlock` - Spinlock for short critical sections
//! - `traits` - Signal and scheduling seams
//! - `kprint` - Leveled logging macros
//! - `env` - Environment variable helpers

pub mod ring;
pub mod segment;
pub mod cmsg;
pub mod token;
pub mod flags;
pub mod id;
pub mod interrupt;
pub mod error;
pub mod spinlock;
pub mod traits;
pub mod kprint;
pub mod env;

pub use ring::RingBuffer;
pub use segment::{EnqueueMark, SegmentHeader, SegmentQueue, SEGMENT_HEADER_SIZE};
pub use cmsg::{CmsgBuilder, CmsgIter, CmsgWriter};
pub use token::OwnershipToken;
pub use flags::{FdFlags, MsgFlags, PollEvents, StatusFlags};
pub use id::TaskId;
pub use interrupt::Interrupt;
pub use error::{ChanError, ChanResult, Transfer};
pub use spinlock::SpinLock;
pub use traits::{SchedHint, SignalSink};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_size, env_get_str, env_is_set};

/// Fixed limits shared by every channel
pub mod constants {
    /// Smallest ring a channel may be resized to
    pub const MIN_BUFFER_FLOOR: usize = 64;

    /// Signal raised on a write to a channel with no readers
    pub const SIGPIPE: i32 = libc::SIGPIPE;

    /// Default upper bound for a task's descriptor table
    pub const DEFAULT_MAX_FDS: usize = 1024;

    /// Largest iovec count accepted by readv/writev
    pub const IOV_MAX: usize = 1024;
}
