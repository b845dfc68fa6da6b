//! Kernel-style leveled logging
//!
//! Line-atomic stderr output in the spirit of `dev_dbg`/`dev_warn`.
//!
//! # Environment Variables
//!
//! - `VCL_LOG_LEVEL=<level>` - `off|error|warn|info|debug|trace` or `0..5` (default: warn)
//! - `VCL_FLUSH_EPRINT=1` - Flush stderr after every line
//!
//! # Usage
//!
//! ```ignore
//! use vcl_core::{kdebug, kinfo, kwarn};
//!
//! kinfo!("Initialised endpoint {} with {} channel(s).", ep, n);
//! kdebug!(chn = id; "Opening transaction {} on buffer {}", txn, buf);
//! kwarn!(chn = id; "Spurious completion interrupt");
//! ```

use std::io::Write;
use std::str::FromStr;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels, most severe first
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
    fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "vcl err:",
            LogLevel::Warn => "vcl warn:",
            LogLevel::Info => "vcl:",
            LogLevel::Debug => "vcl dbg:",
            LogLevel::Trace => "vcl trace:",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(LogLevel::Off),
            "error" | "err" | "1" => Ok(LogLevel::Error),
            "warn" | "warning" | "2" => Ok(LogLevel::Warn),
            "info" | "3" => Ok(LogLevel::Info),
            "debug" | "dbg" | "4" => Ok(LogLevel::Debug),
            "trace" | "5" => Ok(LogLevel::Trace),
            _ => Err(()),
        }
    }
}

static ENV_INIT: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

fn init_from_env() {
    ENV_INIT.call_once(|| {
        if let Some(level) = std::env::var("VCL_LOG_LEVEL")
            .ok()
            .and_then(|v| v.parse::<LogLevel>().ok())
        {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
        if let Ok(v) = std::env::var("VCL_FLUSH_EPRINT") {
            FLUSH.store(matches!(v.as_str(), "1" | "true" | "yes" | "on"), Ordering::Relaxed);
        }
    });
}

/// Current log level
#[inline]
pub fn log_level() -> LogLevel {
    init_from_env();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Override the level (wins over the environment)
pub fn set_log_level(level: LogLevel) {
    init_from_env();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init_from_env();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

fn emit(level: LogLevel, channel: Option<u32>, args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = match channel {
        Some(id) => write!(out, "{} Channel {}: ", level.tag(), id),
        None => write!(out, "{} ", level.tag()),
    };
    let _ = out.write_fmt(args);
    let _ = out.write_all(b"\n");
    if FLUSH.load(Ordering::Relaxed) {
        let _ = out.flush();
    }
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(level, None, args);
    }
}

#[doc(hidden)]
pub fn _klog_chn_impl(level: LogLevel, channel: u32, args: std::fmt::Arguments<'_>) {
    if level_enabled(level) {
        emit(level, Some(channel), args);
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __klog {
    ($lvl:ident, chn = $id:expr; $($arg:tt)*) => {{
        $crate::kprint::_klog_chn_impl(
            $crate::kprint::LogLevel::$lvl,
            $id as u32,
            format_args!($($arg)*)
        );
    }};
    ($lvl:ident, $($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::$lvl,
            format_args!($($arg)*)
        );
    }};
}

/// Error level log
#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::__klog!(Error, $($arg)*) };
}

/// Warning level log
#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::__klog!(Warn, $($arg)*) };
}

/// Info level log
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::__klog!(Info, $($arg)*) };
}

/// Debug level log
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::__klog!(Debug, $($arg)*) };
}

/// Trace level log (most verbose)
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => { $crate::__klog!(Trace, $($arg)*) };
}
