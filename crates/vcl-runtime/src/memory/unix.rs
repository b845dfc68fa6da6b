//! Unix buffer memory using anonymous mmap

use super::{page_round, DmaMemory};
use core::ptr::NonNull;

use nix::errno::Errno;
use vcl_core::{kerror, Result, VclError};

impl DmaMemory {
    /// Reserve `len` bytes of zero-filled, page-aligned memory.
    ///
    /// Pages are populated up front so the device never touches memory
    /// that still has to be faulted in.
    pub fn allocate(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(VclError::OutOfMemory);
        }
        let reserved = page_round(len).ok_or(VclError::OutOfMemory)?;

        let mut flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        #[cfg(target_os = "linux")]
        {
            flags |= libc::MAP_POPULATE;
        }

        let base = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                reserved,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };

        if base == libc::MAP_FAILED {
            let errno = Errno::last();
            kerror!("Failed to allocate {} byte buffer: {}", len, errno);
            return Err(VclError::OutOfMemory);
        }

        let ptr = NonNull::new(base as *mut u8).ok_or(VclError::OutOfMemory)?;
        Ok(Self { ptr, len, reserved })
    }
}

impl Drop for DmaMemory {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.reserved) };
        if ret != 0 {
            kerror!("munmap of {} byte buffer failed: {}", self.reserved, Errno::last());
        }
    }
}
