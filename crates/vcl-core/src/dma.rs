//! DMA mapping abstraction.
//!
//! A `DmaMapper` turns a host memory region into an address the device can
//! reach, and tears that mapping down once the device is done with it.
//!
//! # Implementors
//!
//! - `IommuMapper` (vcl-module): hands out bus addresses from a window
//!   and keeps a translation table, like an IOMMU. Device models reach
//!   host memory only through that table. Supports fault injection.

use core::fmt;
use core::ptr::NonNull;

use crate::error::Result;

/// Transfer direction of a channel, fixed at bring-up.
///
/// Named from the device's point of view, like the hardware does:
/// the device *receives* on an RX channel and *transmits* on a TX channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Host to device (host writes)
    Rx,
    /// Device to host (host reads)
    Tx,
}

impl Direction {
    /// Short name used in node names and diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }

    /// Whether the host moves data into the buffers (RX) before submission
    #[inline]
    pub fn is_to_device(&self) -> bool {
        matches!(self, Direction::Rx)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Device-visible bus address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DmaAddr(pub u64);

impl DmaAddr {
    /// Low 32 bits, for the address-low register
    #[inline]
    pub fn lo(&self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits, for the address-high register
    #[inline]
    pub fn hi(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

/// Host memory region handed to a `DmaMapper`.
#[derive(Debug, Clone, Copy)]
pub struct HostRegion {
    /// Start of the region (page aligned for driver buffers)
    pub ptr: NonNull<u8>,
    /// Bytes the device may touch
    pub len: usize,
}

// Safety: a region is a pointer + length; access discipline is enforced by
// the queue that owns the buffer, not by this handle.
unsafe impl Send for HostRegion {}
unsafe impl Sync for HostRegion {}

/// Maps buffers for device access.
///
/// **Contract:**
/// - `map()` and `unmap()` must NEVER block. The completion handler calls
///   them from interrupt context with the channel lock held.
/// - Between `map()` and the matching `unmap()` the device co-owns the
///   region; the host must not read or write it.
/// - `unmap()` is called exactly once per successful `map()`. A failed
///   `map()` leaves nothing to release.
pub trait DmaMapper: Send + Sync {
    /// Map `region` for a transfer in `direction`.
    ///
    /// Returns `Err(Fault)` if the device cannot address the region.
    fn map(&self, region: HostRegion, direction: Direction) -> Result<DmaAddr>;

    /// Release a mapping obtained from `map()`.
    fn unmap(&self, addr: DmaAddr, len: usize, direction: Direction);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_split() {
        let addr = DmaAddr(0x0000_0001_8000_0040);
        assert_eq!(addr.lo(), 0x8000_0040);
        assert_eq!(addr.hi(), 0x1);
        assert_eq!(DmaAddr(0xDEAD_BEEF).hi(), 0);
    }

    #[test]
    fn test_direction_labels() {
        assert_eq!(Direction::Rx.label(), "rx");
        assert_eq!(format!("{}", Direction::Tx), "tx");
        assert!(Direction::Rx.is_to_device());
        assert!(!Direction::Tx.is_to_device());
    }
}
