//! Error types for the channel driver

use core::fmt;

use crate::dma::Direction;

/// Result type for driver operations
pub type Result<T> = core::result::Result<T, VclError>;

/// Errors surfaced by the channel driver
///
/// `TryAgain` and `Restart` are the two caller-actionable failures of the
/// blocking file contract. Everything else is either a fault of a single
/// call or a bring-up failure of the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VclError {
    /// Bounded wait expired without a queue change; retry the call
    TryAgain,

    /// Wait interrupted by a signal; the call should be restarted
    Restart,

    /// Mapping a buffer for device access failed
    Fault,

    /// Channel (or register port) already has an opener
    Busy,

    /// Open mode does not match the channel's fixed direction
    BadMode {
        channel: u32,
        direction: Direction,
    },

    /// File was not opened for the requested operation
    NotOpenFor(&'static str),

    /// Channel reports a direction the pipeline cannot drive
    UnsupportedDirection {
        channel: u32,
        bits: u32,
    },

    /// Register window returned all-ones for the endpoint descriptor
    DeviceUnreachable,

    /// No channel at this index
    NoSuchChannel(usize),

    /// Buffer memory could not be allocated
    OutOfMemory,

    /// Configuration rejected by validation
    InvalidConfig(ConfigError),

    /// Device node registration failed with errno
    Registration(i32),

    /// OS error with errno
    Os(i32),
}

impl VclError {
    /// POSIX errno for this error, as a character device would return it
    pub fn errno(&self) -> i32 {
        match self {
            VclError::TryAgain => libc::EAGAIN,
            VclError::Restart => libc::EINTR,
            VclError::Fault => libc::EFAULT,
            VclError::Busy => libc::EBUSY,
            VclError::BadMode { .. } => libc::ENODEV,
            VclError::NotOpenFor(_) => libc::EBADF,
            VclError::UnsupportedDirection { .. } => libc::ENODEV,
            VclError::DeviceUnreachable => libc::ENODEV,
            VclError::NoSuchChannel(_) => libc::ENODEV,
            VclError::OutOfMemory => libc::ENOMEM,
            VclError::InvalidConfig(_) => libc::EINVAL,
            VclError::Registration(e) => *e,
            VclError::Os(e) => *e,
        }
    }

    /// Timed-out wait: nothing changed, the caller retries
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, VclError::TryAgain)
    }

    /// Signal-interrupted wait: the caller's runtime restarts the call
    #[inline]
    pub fn is_restart(&self) -> bool {
        matches!(self, VclError::Restart)
    }
}

impl fmt::Display for VclError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VclError::TryAgain => write!(f, "resource temporarily unavailable, try again"),
            VclError::Restart => write!(f, "wait interrupted by signal, restart call"),
            VclError::Fault => write!(f, "failed to map buffer for device access"),
            VclError::Busy => write!(f, "device busy"),
            VclError::BadMode { channel, direction } => write!(
                f,
                "channel {} is {} only, open mode does not match",
                channel,
                direction.label()
            ),
            VclError::NotOpenFor(op) => write!(f, "file not opened for {}", op),
            VclError::UnsupportedDirection { channel, bits } => write!(
                f,
                "channel {} reports unsupported direction {:#x}",
                channel, bits
            ),
            VclError::DeviceUnreachable => write!(f, "failed to read from device"),
            VclError::NoSuchChannel(idx) => write!(f, "no channel at index {}", idx),
            VclError::OutOfMemory => write!(f, "failed to allocate buffer memory"),
            VclError::InvalidConfig(e) => write!(f, "{}", e),
            VclError::Registration(e) => write!(f, "device node registration: errno {}", e),
            VclError::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for VclError {}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidValue(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidValue(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<ConfigError> for VclError {
    fn from(e: ConfigError) -> Self {
        VclError::InvalidConfig(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(VclError::TryAgain.errno(), libc::EAGAIN);
        assert_eq!(VclError::Restart.errno(), libc::EINTR);
        assert_eq!(VclError::Fault.errno(), libc::EFAULT);
        assert_eq!(VclError::Busy.errno(), libc::EBUSY);
        assert_eq!(VclError::Registration(libc::ENOSPC).errno(), libc::ENOSPC);
    }

    #[test]
    fn test_transient_and_restart_are_distinct() {
        assert!(VclError::TryAgain.is_transient());
        assert!(!VclError::TryAgain.is_restart());
        assert!(VclError::Restart.is_restart());
        assert!(!VclError::Restart.is_transient());
        assert!(!VclError::Fault.is_transient());
    }

    #[test]
    fn test_error_display() {
        let e = VclError::BadMode { channel: 2, direction: Direction::Tx };
        assert_eq!(format!("{}", e), "channel 2 is tx only, open mode does not match");

        let e: VclError = ConfigError::InvalidValue("buffer_count must be > 0").into();
        assert_eq!(format!("{}", e), "invalid config: buffer_count must be > 0");
    }
}
