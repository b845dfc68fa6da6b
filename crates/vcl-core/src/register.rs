//! Register window abstraction.
//!
//! A `RegisterAccess` is the endpoint's MMIO window: fixed-width 32-bit
//! reads and writes at byte offsets from the BAR base.
//!
//! # Implementors
//!
//! - `MmioWindow` (vcl-module): a memory-mapped PCI BAR resource file.
//!   Accesses are volatile.
//!
//! - `RegisterFile` (vcl-module): an in-memory window with a write log.
//!   Used by tests and by device models.
//!
//! - `LoopbackDevice` (vcl-module): a register file that also reacts to
//!   descriptor writes like the transceiver does.

use crate::regs::ChannelRegister;

/// 32-bit register window.
///
/// **Contract:**
/// - Neither method may block; both are called with the channel lock held.
/// - A write to `ChannelRegister::Size` is the act that starts a transfer.
/// - A window that is not responding reads back all-ones.
pub trait RegisterAccess: Send + Sync {
    /// Read the 32-bit register at byte `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Write the 32-bit register at byte `offset`.
    fn write32(&self, offset: usize, value: u32);

    /// Read a register from the block of channel `id`.
    #[inline]
    fn read_channel(&self, id: u32, reg: ChannelRegister) -> u32 {
        self.read32(reg.offset(id))
    }

    /// Write a register in the block of channel `id`.
    #[inline]
    fn write_channel(&self, id: u32, reg: ChannelRegister, value: u32) {
        self.write32(reg.offset(id), value)
    }
}
