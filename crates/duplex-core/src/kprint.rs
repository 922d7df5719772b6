//! Leveled stderr logging for channel events
//!
//! Lines are written under the stderr lock so concurrent tasks never
//! interleave mid-line. Each line carries the emitting module path.
//!
//! # Environment Variables
//!
//! - `DUPLEX_LOG_LEVEL=<level>`: off, error, warn, info, debug, trace (or 0-5)
//! - `DUPLEX_FLUSH_EPRINT=1`: flush stderr after every line
//!
//! ```ignore
//! use duplex_core::{kdebug, kwarn};
//!
//! kdebug!("resized ring to {} bytes", size);
//! kwarn!("refusing to pass endpoint with {} pending handles", n);
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::env::{env_get_bool, env_get_opt};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "E",
            LogLevel::Warn => "W",
            LogLevel::Info => "I",
            LogLevel::Debug => "D",
            LogLevel::Trace => "T",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(LogLevel::Off),
            "error" | "1" => Ok(LogLevel::Error),
            "warn" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

/// `LOG_LEVEL` before the environment has been read
const UNSET: u8 = u8::MAX;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(UNSET);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Read `DUPLEX_LOG_LEVEL` and `DUPLEX_FLUSH_EPRINT`.
///
/// Runs implicitly on first use. A level set with `set_log_level` before
/// that wins over the environment.
pub fn init() {
    let level = env_get_opt::<LogLevel>("DUPLEX_LOG_LEVEL").unwrap_or(LogLevel::Warn);
    if LOG_LEVEL
        .compare_exchange(UNSET, level as u8, Ordering::SeqCst, Ordering::Relaxed)
        .is_ok()
    {
        FLUSH.store(env_get_bool("DUPLEX_FLUSH_EPRINT", false), Ordering::Relaxed);
    }
}

#[inline]
pub fn log_level() -> LogLevel {
    match LOG_LEVEL.load(Ordering::Relaxed) {
        UNSET => {
            init();
            LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
        }
        v => LogLevel::from_u8(v),
    }
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::SeqCst);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

/// One whole line under the stderr lock
fn emit(prefix: Option<(LogLevel, &str)>, args: std::fmt::Arguments<'_>) {
    let mut out = std::io::stderr().lock();
    let _ = match prefix {
        Some((level, module)) => writeln!(out, "[{} {}] {}", level.tag(), module, args),
        None => writeln!(out, "{}", args),
    };
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: std::fmt::Arguments<'_>) {
    log_level();
    emit(None, args);
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, module: &str, args: std::fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(Some((level, module)), args);
    }
}

/// Unleveled line to stderr, shown regardless of `DUPLEX_LOG_LEVEL`
#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprintln!("") };
    ($($arg:tt)*) => { $crate::kprint::_kprintln_impl(format_args!($($arg)*)) };
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        $crate::kprint::_klog_impl($level, module_path!(), format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Debug, $($arg)*) };
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::klog!($crate::kprint::LogLevel::Trace, $($arg)*) };
}
