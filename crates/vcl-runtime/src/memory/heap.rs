//! Buffer memory from the global allocator, for non-unix targets

use super::{page_round, DmaMemory};
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

use vcl_core::constants::PAGE_SIZE;
use vcl_core::{Result, VclError};

impl DmaMemory {
    /// Reserve `len` bytes of zero-filled, page-aligned memory.
    pub fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(VclError::OutOfMemory);
        }
        let reserved = page_round(len).ok_or(VclError::OutOfMemory)?;
        let layout = Layout::from_size_align(reserved, PAGE_SIZE).map_err(|_| VclError::OutOfMemory)?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(VclError::OutOfMemory)?;
        Ok(Self { ptr, len, reserved })
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.reserved, PAGE_SIZE) {
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}
