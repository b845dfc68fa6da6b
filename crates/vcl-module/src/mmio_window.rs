//! `MmioWindow` - memory-mapped BAR resource as `RegisterAccess`.
//!
//! Maps a PCI resource file (`/sys/bus/pci/devices/<bdf>/resource<n>`)
//! shared and read-write. Every access is a single volatile 32-bit load or
//! store. Offsets past the mapping or not word aligned read back all-ones
//! and drop writes, like an unanswered bus cycle.

use core::ffi::c_void;
use core::num::NonZeroUsize;
use core::ptr::{self, NonNull};
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use vcl_core::constants::INVALID_READ;
use vcl_core::{kdebug, kwarn, RegisterAccess, Result, VclError};

pub struct MmioWindow {
    base: NonNull<c_void>,
    len: usize,
    path: PathBuf,
}

// Safety: the mapping lives until drop, and every access is a single
// aligned volatile word operation.
unsafe impl Send for MmioWindow {}
unsafe impl Sync for MmioWindow {}

impl MmioWindow {
    /// Map the first `len` bytes of `path`.
    pub fn open(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref();
        let length = NonZeroUsize::new(len).ok_or(VclError::DeviceUnreachable)?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC | libc::O_SYNC)
            .open(path)
            .map_err(|e| {
                kwarn!("Opening {} failed: {}", path.display(), e);
                VclError::Os(e.raw_os_error().unwrap_or(libc::EIO))
            })?;

        // Safety: fresh mapping of a file we own, no fixed address
        let base = unsafe {
            mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                &file,
                0,
            )
        }
        .map_err(|e| {
            kwarn!("Mapping {} ({} bytes) failed: {}", path.display(), len, e);
            VclError::Os(e as i32)
        })?;

        kdebug!("Mapped {} bytes of {}", len, path.display());
        Ok(Self { base, len, path: path.to_path_buf() })
    }

    /// Map BAR `bar` of the PCI function `bdf` (e.g. `0000:03:00.0`)
    pub fn open_pci(bdf: &str, bar: u32, len: usize) -> Result<Self> {
        Self::open(format!("/sys/bus/pci/devices/{}/resource{}", bdf, bar), len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    fn word(&self, offset: usize) -> Option<*mut u32> {
        if offset % 4 != 0 || offset + 4 > self.len {
            return None;
        }
        // Safety: bounds checked above
        Some(unsafe { (self.base.as_ptr() as *mut u8).add(offset) as *mut u32 })
    }
}

impl RegisterAccess for MmioWindow {
    #[inline]
    fn read32(&self, offset: usize) -> u32 {
        match self.word(offset) {
            // Safety: aligned and inside the live mapping
            Some(p) => unsafe { ptr::read_volatile(p) },
            None => INVALID_READ,
        }
    }

    #[inline]
    fn write32(&self, offset: usize, value: u32) {
        if let Some(p) = self.word(offset) {
            // Safety: aligned and inside the live mapping
            unsafe { ptr::write_volatile(p, value) }
        }
    }
}

impl Drop for MmioWindow {
    fn drop(&mut self) {
        // Safety: base/len describe the mapping created in open()
        if let Err(e) = unsafe { munmap(self.base, self.len) } {
            kwarn!("munmap of {} failed: {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for MmioWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmioWindow")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}
