//! Channel configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables
//! 3. Library defaults (`defaults.rs`)
//!
//! # Example
//!
//! ```rust,ignore
//! use duplex_runtime::config::ChannelConfig;
//!
//! let config = ChannelConfig::from_env()
//!     .default_buffer_size(16 * 1024)
//!     .wait_slice(Duration::from_millis(2));
//! config.validate()?;
//! ```

pub mod defaults;

use std::time::Duration;

use duplex_core::constants::MIN_BUFFER_FLOOR;
use duplex_core::env::{env_get, env_get_bool, env_get_size};
use duplex_core::kprintln;

/// Sizing and wait behaviour shared by the channels a caller creates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Ring size given to new channels
    pub default_buffer_size: usize,
    /// Lower clamp for `resize`
    pub min_buffer_size: usize,
    /// Upper clamp for `resize`
    pub max_buffer_size: usize,
    /// Longest single condition-variable sleep
    pub wait_slice: Duration,
    /// Whether new channels start with SIGPIPE delivery enabled
    pub sigpipe: bool,
    /// Whether waiters yield to a pledged peer
    pub yield_hint: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ChannelConfig {
    /// Library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `DUPLEX_BUFFER_SIZE` - ring size of new channels (accepts K/M suffix)
    /// - `DUPLEX_MIN_BUFFER_SIZE` - lower resize clamp
    /// - `DUPLEX_MAX_BUFFER_SIZE` - upper resize clamp
    /// - `DUPLEX_WAIT_SLICE_MS` - wait slice in milliseconds
    /// - `DUPLEX_SIGPIPE` - raise SIGPIPE on broken pipe (0/1)
    /// - `DUPLEX_YIELD_HINT` - yield to pledged peers (0/1)
    pub fn from_env() -> Self {
        Self {
            default_buffer_size: env_get_size("DUPLEX_BUFFER_SIZE", defaults::BUFFER_SIZE),
            min_buffer_size: env_get_size("DUPLEX_MIN_BUFFER_SIZE", defaults::MIN_BUFFER_SIZE),
            max_buffer_size: env_get_size("DUPLEX_MAX_BUFFER_SIZE", defaults::MAX_BUFFER_SIZE),
            wait_slice: Duration::from_millis(env_get(
                "DUPLEX_WAIT_SLICE_MS",
                defaults::WAIT_SLICE_MS,
            )),
            sigpipe: env_get_bool("DUPLEX_SIGPIPE", defaults::SIGPIPE),
            yield_hint: env_get_bool("DUPLEX_YIELD_HINT", defaults::YIELD_HINT),
        }
    }

    /// Library defaults only, ignoring the environment
    pub fn new() -> Self {
        Self {
            default_buffer_size: defaults::BUFFER_SIZE,
            min_buffer_size: defaults::MIN_BUFFER_SIZE,
            max_buffer_size: defaults::MAX_BUFFER_SIZE,
            wait_slice: Duration::from_millis(defaults::WAIT_SLICE_MS),
            sigpipe: defaults::SIGPIPE,
            yield_hint: defaults::YIELD_HINT,
        }
    }

    // Builder methods

    pub fn default_buffer_size(mut self, size: usize) -> Self {
        self.default_buffer_size = size;
        self
    }

    pub fn min_buffer_size(mut self, size: usize) -> Self {
        self.min_buffer_size = size;
        self
    }

    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    pub fn wait_slice(mut self, d: Duration) -> Self {
        self.wait_slice = d;
        self
    }

    pub fn sigpipe(mut self, enable: bool) -> Self {
        self.sigpipe = enable;
        self
    }

    pub fn yield_hint(mut self, enable: bool) -> Self {
        self.yield_hint = enable;
        self
    }

    /// `(min, max)` ring size actually enforced.
    ///
    /// Unvalidated settings are normalised here: the minimum is raised to
    /// the floor, the maximum capped to what a segment length can hold and
    /// never below the minimum.
    pub fn size_bounds(&self) -> (usize, usize) {
        let ceiling = u32::MAX as usize;
        let min = self.min_buffer_size.clamp(MIN_BUFFER_FLOOR, ceiling);
        let max = self.max_buffer_size.clamp(min, ceiling);
        (min, max)
    }

    /// Clamp a requested ring size into the configured bounds
    pub fn clamp_size(&self, requested: usize) -> usize {
        let (min, max) = self.size_bounds();
        requested.clamp(min, max)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_buffer_size < MIN_BUFFER_FLOOR {
            return Err(ConfigError::InvalidValue("min_buffer_size must be >= 64"));
        }
        if self.min_buffer_size > self.default_buffer_size {
            return Err(ConfigError::InvalidValue(
                "min_buffer_size must be <= default_buffer_size",
            ));
        }
        if self.default_buffer_size > self.max_buffer_size {
            return Err(ConfigError::InvalidValue(
                "default_buffer_size must be <= max_buffer_size",
            ));
        }
        if self.max_buffer_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_buffer_size must fit in u32"));
        }
        if self.wait_slice.is_zero() {
            return Err(ConfigError::InvalidValue("wait_slice must be > 0"));
        }
        Ok(())
    }

    pub fn print(&self) {
        kprintln!("Channel Configuration:");
        kprintln!("  default_buffer_size:  {}", self.default_buffer_size);
        kprintln!("  min_buffer_size:      {}", self.min_buffer_size);
        kprintln!("  max_buffer_size:      {}", self.max_buffer_size);
        kprintln!("  wait_slice:           {:?}", self.wait_slice);
        kprintln!("  sigpipe:              {}", self.sigpipe);
        kprintln!("  yield_hint:           {}", self.yield_hint);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}
