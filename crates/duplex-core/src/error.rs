//! Error types for channel operations
//!
//! Every variant maps onto one POSIX errno so the syscall layer can hand
//! the value straight back to userspace.

use core::fmt;

/// Result type for channel operations
pub type ChanResult<T> = Result<T, ChanError>;

/// Errors that can occur on a pipe or socket channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanError {
    /// Non-blocking call found no data or no space (`EAGAIN`)
    WouldBlock,

    /// Blocking wait interrupted before any byte moved (`EINTR`)
    Interrupted,

    /// No reader remains on the channel (`EPIPE`)
    BrokenPipe,

    /// Control data can never fit, even in an empty buffer (`EMSGSIZE`)
    MessageTooLarge,

    /// Descriptor passing refused to avoid a reference cycle (`EPERM`)
    PermissionDenied,

    /// Bad flag combination, malformed control message, bad iovec (`EINVAL`)
    InvalidArgument(&'static str),

    /// Descriptor number does not name an open file (`EBADF`)
    BadDescriptor,

    /// Descriptor table cannot take more entries (`EMFILE`)
    TooManyDescriptors,

    /// Socket operation on a file that is not a socket (`ENOTSOCK`)
    NotSocket,

    /// Operation on a direction that was never connected or was shut down (`ENOTCONN`)
    NotConnected,

    /// Allocation failed in a collaborator (`ENOMEM`)
    NoMemory,
}

impl ChanError {
    /// POSIX errno for this error
    pub fn errno(&self) -> i32 {
        match self {
            ChanError::WouldBlock => libc::EAGAIN,
            ChanError::Interrupted => libc::EINTR,
            ChanError::BrokenPipe => libc::EPIPE,
            ChanError::MessageTooLarge => libc::EMSGSIZE,
            ChanError::PermissionDenied => libc::EPERM,
            ChanError::InvalidArgument(_) => libc::EINVAL,
            ChanError::BadDescriptor => libc::EBADF,
            ChanError::TooManyDescriptors => libc::EMFILE,
            ChanError::NotSocket => libc::ENOTSOCK,
            ChanError::NotConnected => libc::ENOTCONN,
            ChanError::NoMemory => libc::ENOMEM,
        }
    }

    /// Map a raw errno reported by a collaborator back into a `ChanError`.
    ///
    /// Unknown values collapse to `InvalidArgument`.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::EAGAIN => ChanError::WouldBlock,
            libc::EINTR => ChanError::Interrupted,
            libc::EPIPE => ChanError::BrokenPipe,
            libc::EMSGSIZE => ChanError::MessageTooLarge,
            libc::EPERM => ChanError::PermissionDenied,
            libc::EBADF => ChanError::BadDescriptor,
            libc::EMFILE | libc::ENFILE => ChanError::TooManyDescriptors,
            libc::ENOTSOCK => ChanError::NotSocket,
            libc::ENOTCONN => ChanError::NotConnected,
            libc::ENOMEM => ChanError::NoMemory,
            _ => ChanError::InvalidArgument("unrecognized errno"),
        }
    }

    /// True for the transient backpressure case
    #[inline]
    pub fn is_would_block(&self) -> bool {
        matches!(self, ChanError::WouldBlock)
    }
}

impl fmt::Display for ChanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChanError::WouldBlock => write!(f, "operation would block"),
            ChanError::Interrupted => write!(f, "interrupted wait"),
            ChanError::BrokenPipe => write!(f, "broken pipe"),
            ChanError::MessageTooLarge => write!(f, "message too large for channel"),
            ChanError::PermissionDenied => write!(f, "descriptor passing not permitted"),
            ChanError::InvalidArgument(why) => write!(f, "invalid argument: {}", why),
            ChanError::BadDescriptor => write!(f, "bad file descriptor"),
            ChanError::TooManyDescriptors => write!(f, "descriptor table full"),
            ChanError::NotSocket => write!(f, "not a socket"),
            ChanError::NotConnected => write!(f, "not connected"),
            ChanError::NoMemory => write!(f, "out of memory"),
        }
    }
}

impl std::error::Error for ChanError {}

/// Progress of a byte transfer that may stop part way.
///
/// Once any byte has moved, a later failure in the same call is reported
/// as the partial count instead of the error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transfer {
    done: usize,
}

impl Transfer {
    pub const fn new() -> Self {
        Self { done: 0 }
    }

    #[inline]
    pub fn add(&mut self, amount: usize) {
        self.done += amount;
    }

    #[inline]
    pub fn done(&self) -> usize {
        self.done
    }

    /// Resolve a failure against the progress made so far
    #[inline]
    pub fn fail(self, err: ChanError) -> ChanResult<usize> {
        if self.done > 0 {
            Ok(self.done)
        } else {
            Err(err)
        }
    }
}
