//! # vcl-core
//!
//! Core types and trait seams for the VerCoLib PCIe DMA channel driver.
//!
//! This crate is platform-agnostic and contains no device access of its own.
//! The channel engine lives in `vcl-runtime`; default implementations of the
//! traits defined here live in `vcl-module`.
//!
//! ## Modules
//!
//! - `error` - Error taxonomy shared by every layer
//! - `regs` - Register map and channel descriptor decoding
//! - `register` - `RegisterAccess`, the MMIO window seam
//! - `dma` - Transfer direction, host regions and the `DmaMapper` seam
//! - `interrupt` - `InterruptSink`, the completion signal seam
//! - `registrar` - `ChannelRegistrar`, the device node seam
//! - `spinlock` - Short critical section lock used for channel queues
//! - `signal` - Pending-signal token for interruptible waits
//! - `kprint` - Kernel-style leveled logging macros
//!
//! ## Design principle
//!
//! Everything that touches hardware or the host OS is a trait here, so the
//! buffer lifecycle can be driven by a real BAR window, an in-memory
//! register file or a simulated device without changing a line of it.

pub mod error;
pub mod regs;
pub mod register;
pub mod dma;
pub mod interrupt;
pub mod registrar;
pub mod spinlock;
pub mod signal;
pub mod kprint;

// Re-exports for convenience
pub use error::{ConfigError, Result, VclError};
pub use regs::{ChannelInfo, ChannelKind, ChannelRegister, EndpointInfo, InfoDirection};
pub use register::RegisterAccess;
pub use dma::{DmaAddr, DmaMapper, Direction, HostRegion};
pub use interrupt::InterruptSink;
pub use registrar::{ChannelRegistrar, DeviceNode, NodeHandle};
pub use spinlock::SpinLock;
pub use signal::SignalToken;

/// Constants shared by the runtime and the device models
pub mod constants {
    /// Host page size assumed for buffer sizing
    pub const PAGE_SIZE: usize = 4096;

    /// Default number of DMA buffers per channel
    pub const DEFAULT_BUFFER_COUNT: usize = 2;

    /// Default buffer order: each buffer is `PAGE_SIZE << order` bytes
    pub const DEFAULT_BUFFER_ORDER: u32 = 8;

    /// Largest channel id addressable through the register map
    pub const MAX_CHANNEL_ID: u32 = 0xFF;

    /// Value read back from a register window that is not responding
    pub const INVALID_READ: u32 = 0xFFFF_FFFF;
}
