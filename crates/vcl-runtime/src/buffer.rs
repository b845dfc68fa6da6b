//! Channel buffer
//!
//! A `Buffer` is one pool slot: a fixed-capacity memory region plus the
//! bookkeeping of the transfer it currently carries. Buffers are moved
//! between the channel queues by value, so a buffer can only ever be in
//! one queue.

use vcl_core::{DmaAddr, HostRegion, Result};

use crate::memory::DmaMemory;

/// One DMA buffer of a channel's pool
#[derive(Debug)]
pub struct Buffer {
    /// Pool index, stable for the buffer's lifetime
    id: u8,

    memory: DmaMemory,

    /// Bytes of the current transfer (requested, then transferred)
    pub(crate) size: usize,

    /// Read offset into a serviced buffer
    pub(crate) cursor: usize,

    /// Descriptor programmed and completion not yet retired
    pub(crate) in_flight: bool,

    /// Bus address while mapped for device access
    pub(crate) device_address: Option<DmaAddr>,
}

impl Buffer {
    /// Allocate a buffer of `capacity` bytes
    pub fn new(id: u8, capacity: usize) -> Result<Self> {
        Ok(Self {
            id,
            memory: DmaMemory::allocate(capacity)?,
            size: 0,
            cursor: 0,
            in_flight: false,
            device_address: None,
        })
    }

    #[inline]
    pub fn id(&self) -> u8 {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.memory.len()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[inline]
    pub fn device_address(&self) -> Option<DmaAddr> {
        self.device_address
    }

    /// Bytes not yet handed to the reader
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size.saturating_sub(self.cursor)
    }

    /// Region for the `DmaMapper`
    #[inline]
    pub(crate) fn region(&self) -> HostRegion {
        self.memory.region()
    }

    /// Valid bytes of the current transfer
    pub fn data(&self) -> &[u8] {
        &self.memory.as_slice()[..self.size.min(self.capacity())]
    }

    /// Copy up to `capacity` bytes from `src` and size the transfer to it.
    ///
    /// Returns the number of bytes taken.
    pub(crate) fn fill_from(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.capacity());
        self.memory.as_mut_slice()[..n].copy_from_slice(&src[..n]);
        self.size = n;
        self.cursor = 0;
        n
    }

    /// Copy unread bytes into `dst` and advance the cursor.
    ///
    /// Returns the number of bytes copied.
    pub(crate) fn drain_into(&mut self, dst: &mut [u8]) -> usize {
        let n = self.remaining().min(dst.len());
        if n == 0 {
            return 0;
        }
        let start = self.cursor;
        dst[..n].copy_from_slice(&self.memory.as_slice()[start..start + n]);
        self.cursor += n;
        n
    }

    /// Whether every transferred byte has been read
    #[inline]
    pub(crate) fn is_drained(&self) -> bool {
        self.cursor >= self.size
    }

    /// Forget the last transfer before going back to idle
    pub(crate) fn reset(&mut self) {
        self.size = 0;
        self.cursor = 0;
        self.in_flight = false;
        self.device_address = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_truncates_to_capacity() {
        let mut buf = Buffer::new(0, 8).unwrap();
        let taken = buf.fill_from(&[1u8; 20]);
        assert_eq!(taken, 8);
        assert_eq!(buf.size(), 8);
        assert_eq!(buf.data(), &[1u8; 8]);
    }

    #[test]
    fn test_partial_drain_advances_cursor() {
        let mut buf = Buffer::new(1, 16).unwrap();
        buf.fill_from(b"hello world");

        let mut out = [0u8; 5];
        assert_eq!(buf.drain_into(&mut out), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.cursor(), 5);
        assert_eq!(buf.remaining(), 6);
        assert!(!buf.is_drained());

        let mut rest = [0u8; 32];
        assert_eq!(buf.drain_into(&mut rest), 6);
        assert_eq!(&rest[..6], b" world");
        assert!(buf.is_drained());
        assert_eq!(buf.drain_into(&mut rest), 0);
    }

    #[test]
    fn test_reset() {
        let mut buf = Buffer::new(2, 16).unwrap();
        buf.fill_from(b"abc");
        buf.in_flight = true;
        buf.device_address = Some(DmaAddr(0x1000));
        buf.reset();
        assert_eq!(buf.size(), 0);
        assert_eq!(buf.cursor(), 0);
        assert!(!buf.is_in_flight());
        assert!(buf.device_address().is_none());
        assert_eq!(buf.capacity(), 16);
    }
}
