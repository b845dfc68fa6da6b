//! Library defaults, matching the transceiver's reference driver.

use vcl_core::constants::{DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_ORDER, PAGE_SIZE};

/// DMA buffers per channel
pub const BUFFER_COUNT: usize = DEFAULT_BUFFER_COUNT;

/// Bytes per DMA buffer (1 MiB)
pub const BUFFER_SIZE: usize = PAGE_SIZE << DEFAULT_BUFFER_ORDER;

/// Bounded wait of a write for a free buffer
pub const WRITE_TIMEOUT_MS: u64 = 500;

/// Bounded wait of a read for a serviced buffer
pub const READ_TIMEOUT_MS: u64 = 1000;

/// Pending interrupts the dispatcher can hold before dropping edges
pub const IRQ_QUEUE_DEPTH: usize = 256;
