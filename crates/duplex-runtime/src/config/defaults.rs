//! Library defaults for channel configuration
//!
//! Each value can be overridden at runtime through the matching
//! `DUPLEX_*` environment variable; see `ChannelConfig::from_env`.

/// Ring size of a freshly connected channel
pub const BUFFER_SIZE: usize = 64 * 1024;

/// Smallest ring a resize may produce
pub const MIN_BUFFER_SIZE: usize = 4 * 1024;

/// Largest ring a resize may produce
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Longest single sleep before a blocked call re-checks its interrupt
pub const WAIT_SLICE_MS: u64 = 10;

/// New channels raise SIGPIPE on a write with no reader
pub const SIGPIPE: bool = true;

/// Waiters yield to a pledged peer before sleeping
pub const YIELD_HINT: bool = true;
