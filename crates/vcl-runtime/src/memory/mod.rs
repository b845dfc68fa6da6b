//! Buffer memory for DMA transfers
//!
//! Each channel buffer is one page-aligned, zero-filled region allocated at
//! channel creation and released at teardown. Platform-specific code
//! provides `allocate()` and `Drop`.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
    } else {
        mod heap;
    }
}

use core::ptr::NonNull;

use vcl_core::constants::PAGE_SIZE;
use vcl_core::HostRegion;

/// One fixed-size DMA-capable memory region
pub struct DmaMemory {
    /// Start of the region, page aligned
    ptr: NonNull<u8>,

    /// Usable bytes
    len: usize,

    /// Bytes actually reserved (rounded up to whole pages)
    reserved: usize,
}

// Safety: DmaMemory uniquely owns its allocation
unsafe impl Send for DmaMemory {}
unsafe impl Sync for DmaMemory {}

impl DmaMemory {
    /// Usable bytes
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // Safety: ptr is valid for len bytes for the lifetime of self
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // Safety: ptr is valid for len bytes and &mut self is exclusive
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// The region as handed to a `DmaMapper`
    #[inline]
    pub fn region(&self) -> HostRegion {
        HostRegion { ptr: self.ptr, len: self.len }
    }
}

impl core::fmt::Debug for DmaMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DmaMemory")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// Round `len` up to whole pages
#[inline]
fn page_round(len: usize) -> Option<usize> {
    len.checked_add(PAGE_SIZE - 1).map(|n| n & !(PAGE_SIZE - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_round() {
        assert_eq!(page_round(1), Some(PAGE_SIZE));
        assert_eq!(page_round(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(page_round(PAGE_SIZE + 1), Some(2 * PAGE_SIZE));
        assert_eq!(page_round(usize::MAX), None);
    }

    #[test]
    fn test_allocate_zeroed_and_aligned() {
        let mut mem = DmaMemory::allocate(10_000).unwrap();
        assert_eq!(mem.len(), 10_000);
        assert_eq!(mem.as_ptr() as usize % PAGE_SIZE, 0);
        assert!(mem.as_slice().iter().all(|&b| b == 0));

        mem.as_mut_slice()[9_999] = 0xAB;
        assert_eq!(mem.as_slice()[9_999], 0xAB);
        assert_eq!(mem.region().len, 10_000);
    }

    #[test]
    fn test_zero_length_rejected() {
        assert!(DmaMemory::allocate(0).is_err());
    }
}
