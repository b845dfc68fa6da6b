//! Driver configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env()` only)
//! 3. Library defaults (`config::defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use vcl_runtime::DriverConfig;
//!
//! let config = DriverConfig::from_env()
//!     .buffer_count(4)
//!     .read_timeout(Duration::from_millis(250));
//! config.validate()?;
//! ```
//!
//! Channel count, direction and buffer geometry are fixed once an
//! endpoint is brought up; changing the config afterwards has no effect
//! on existing channels.

pub mod defaults;

use std::str::FromStr;
use std::time::Duration;

use vcl_core::error::ConfigError;

/// Parse `key` from the environment, falling back to `default` when unset
/// or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_millis(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_or(key, default_ms))
}

/// Buffer geometry and wait bounds for every channel of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// DMA buffers per channel
    pub buffer_count: usize,
    /// Bytes per DMA buffer
    pub buffer_size: usize,
    /// How long a write waits for an idle or serviced buffer
    pub write_timeout: Duration,
    /// How long a read waits for a serviced buffer
    pub read_timeout: Duration,
    /// Capacity of the interrupt dispatcher queue
    pub irq_queue_depth: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl DriverConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `VCL_BUFFER_COUNT` - Buffers per channel
    /// - `VCL_BUFFER_SIZE` - Bytes per buffer
    /// - `VCL_WRITE_TIMEOUT_MS` - Write wait bound in milliseconds
    /// - `VCL_READ_TIMEOUT_MS` - Read wait bound in milliseconds
    /// - `VCL_IRQ_QUEUE_DEPTH` - Interrupt dispatcher queue capacity
    pub fn from_env() -> Self {
        Self {
            buffer_count: env_or("VCL_BUFFER_COUNT", defaults::BUFFER_COUNT),
            buffer_size: env_or("VCL_BUFFER_SIZE", defaults::BUFFER_SIZE),
            write_timeout: env_millis("VCL_WRITE_TIMEOUT_MS", defaults::WRITE_TIMEOUT_MS),
            read_timeout: env_millis("VCL_READ_TIMEOUT_MS", defaults::READ_TIMEOUT_MS),
            irq_queue_depth: env_or("VCL_IRQ_QUEUE_DEPTH", defaults::IRQ_QUEUE_DEPTH),
        }
    }

    /// Library defaults only, no environment. Useful for tests.
    pub fn new() -> Self {
        Self {
            buffer_count: defaults::BUFFER_COUNT,
            buffer_size: defaults::BUFFER_SIZE,
            write_timeout: Duration::from_millis(defaults::WRITE_TIMEOUT_MS),
            read_timeout: Duration::from_millis(defaults::READ_TIMEOUT_MS),
            irq_queue_depth: defaults::IRQ_QUEUE_DEPTH,
        }
    }

    // Builder methods

    pub fn buffer_count(mut self, n: usize) -> Self {
        self.buffer_count = n;
        self
    }

    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn irq_queue_depth(mut self, n: usize) -> Self {
        self.irq_queue_depth = n;
        self
    }

    /// Validate configuration and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_count == 0 {
            return Err(ConfigError::InvalidValue("buffer_count must be > 0"));
        }
        // Buffer ids are 8 bits wide
        if self.buffer_count > u8::MAX as usize {
            return Err(ConfigError::InvalidValue("buffer_count must be <= 255"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer_size must be > 0"));
        }
        // The size register is 32 bits wide
        if self.buffer_size > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("buffer_size must fit the 32-bit size register"));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("write_timeout must be > 0"));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("read_timeout must be > 0"));
        }
        if self.irq_queue_depth == 0 {
            return Err(ConfigError::InvalidValue("irq_queue_depth must be > 0"));
        }
        Ok(())
    }

    /// Print configuration (for debugging)
    pub fn print(&self) {
        eprintln!("VerCoLib driver configuration:");
        eprintln!("  buffer_count:     {}", self.buffer_count);
        eprintln!("  buffer_size:      {}", self.buffer_size);
        eprintln!("  write_timeout:    {:?}", self.write_timeout);
        eprintln!("  read_timeout:     {:?}", self.read_timeout);
        eprintln!("  irq_queue_depth:  {}", self.irq_queue_depth);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DriverConfig::new();
        assert_eq!(config.buffer_count, 2);
        assert_eq!(config.buffer_size, 1 << 20);
        assert_eq!(config.write_timeout, Duration::from_millis(500));
        assert_eq!(config.read_timeout, Duration::from_millis(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = DriverConfig::new()
            .buffer_count(4)
            .buffer_size(64)
            .write_timeout(Duration::from_millis(5));

        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.buffer_size, 64);
        assert_eq!(config.write_timeout, Duration::from_millis(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(DriverConfig::new().buffer_count(0).validate().is_err());
        assert!(DriverConfig::new().buffer_count(256).validate().is_err());
        assert!(DriverConfig::new().buffer_size(0).validate().is_err());
        assert!(DriverConfig::new().read_timeout(Duration::ZERO).validate().is_err());
        assert!(DriverConfig::new().irq_queue_depth(0).validate().is_err());
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("VCL_TEST_ONLY_BUFFER_COUNT", "7");
        assert_eq!(env_or("VCL_TEST_ONLY_BUFFER_COUNT", 2usize), 7);
        std::env::set_var("VCL_TEST_ONLY_BUFFER_COUNT", "seven");
        assert_eq!(env_or("VCL_TEST_ONLY_BUFFER_COUNT", 2usize), 2);
        std::env::remove_var("VCL_TEST_ONLY_BUFFER_COUNT");
        assert_eq!(env_millis("VCL_TEST_ONLY_UNSET_MS", 30), Duration::from_millis(30));
    }
}
