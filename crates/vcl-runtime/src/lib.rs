//! # vcl-runtime
//!
//! The channel engine of the VerCoLib PCIe DMA driver.
//!
//! Each channel cycles a small pool of DMA buffers through three queues:
//!
//! ```text
//!   idle ──submit──▶ active ──completion──▶ serviced ──drain──▶ idle
//! ```
//!
//! Callers move buffers out of `idle` (write: fill and submit; read:
//! request a transfer) and out of `serviced` (read: copy out; write:
//! recycle). The completion handler is the only one that moves buffers out
//! of `active`.
//!
//! ## Modules
//!
//! - `config` - `DriverConfig`, defaults and environment overrides
//! - `memory` - Page-aligned buffer memory
//! - `buffer` - One pool buffer and its transfer bookkeeping
//! - `queue` - The three per-channel queues
//! - `channel` - Channel state, stats, open slot
//! - `submit` - Mapping and descriptor programming
//! - `completion` - Interrupt-context completion handler
//! - `file` - Blocking read/write/poll contract
//! - `wait` - Wait queue (futex on Linux, condvar elsewhere)
//! - `endpoint` - Channel discovery and node registration
//! - `irq` - Interrupt dispatcher thread
//! - `mmio` - Raw register port and channel pairing
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vcl_runtime::{AccessMode, DriverConfig, Endpoint, IrqDispatcher};
//!
//! let irq = Arc::new(IrqDispatcher::new(256));
//! let ep = Arc::new(Endpoint::probe(regs, mapper, bar, &DriverConfig::from_env())?);
//! irq.start(Arc::clone(&ep))?;
//!
//! let mut tx = ep.open(1, AccessMode::ReadOnly)?;
//! let n = tx.read(&mut buf)?;
//! ```

pub mod config;
pub mod memory;
pub mod buffer;
pub mod queue;
pub mod channel;
pub mod submit;
pub mod completion;
pub mod file;
pub mod wait;
pub mod endpoint;
pub mod irq;
pub mod mmio;

pub use config::DriverConfig;
pub use buffer::Buffer;
pub use queue::Queue;
pub use channel::{Channel, ChannelStats};
pub use file::{AccessMode, ChannelFile, InterruptHandle, Readiness};
pub use endpoint::{Endpoint, NodeRegistration};
pub use irq::IrqDispatcher;
pub use mmio::{MmioPort, PairInfo};
pub use wait::{WaitOutcome, WaitQueue};

// Re-export core for convenience
pub use vcl_core;
