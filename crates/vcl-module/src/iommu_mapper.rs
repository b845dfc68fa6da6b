//! `IommuMapper` - default `DmaMapper` implementation.
//!
//! Hands out device-visible addresses from a bus window and remembers
//! which host region each one translates to, like an IOMMU does. Device
//! models move data only through `write_bus` / `read_bus`, which refuse
//! unmapped addresses and the wrong direction. That catches a driver that
//! touches a buffer after unmapping it.
//!
//! `fail_next(n)` makes the next `n` mappings fail with `Fault`.

use core::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use vcl_core::constants::PAGE_SIZE;
use vcl_core::{kwarn, Direction, DmaAddr, DmaMapper, HostRegion, Result, SpinLock, VclError};

/// First bus address handed out (inside the 32-bit window)
pub const DEFAULT_BUS_BASE: u64 = 0x1000_0000;

struct Mapping {
    bus: u64,
    host: NonNull<u8>,
    len: usize,
    direction: Direction,
}

// Safety: a mapping is only dereferenced under the table lock, while the
// owning buffer is handed to the device
unsafe impl Send for Mapping {}

struct Table {
    next: u64,
    live: Vec<Mapping>,
}

impl Table {
    /// Mapping covering `[addr, addr + len)`
    fn find(&self, addr: u64, len: usize) -> Option<&Mapping> {
        self.live
            .iter()
            .find(|m| addr >= m.bus && addr + len as u64 <= m.bus + m.len as u64)
    }
}

pub struct IommuMapper {
    table: SpinLock<Table>,
    fail_next: AtomicUsize,
    total: AtomicU64,
}

impl IommuMapper {
    pub fn new() -> Self {
        Self {
            table: SpinLock::new(Table { next: DEFAULT_BUS_BASE, live: Vec::new() }),
            fail_next: AtomicUsize::new(0),
            total: AtomicU64::new(0),
        }
    }

    /// Hand out future addresses starting at `base`
    pub fn set_bus_offset(&self, base: u64) {
        self.table.lock().next = base;
    }

    /// Make the next `n` calls to `map()` fail
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Mappings not yet released
    pub fn live_mappings(&self) -> usize {
        self.table.lock().live.len()
    }

    /// Successful `map()` calls so far
    pub fn total_mappings(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Device write into host memory (device-to-host transfer)
    pub fn write_bus(&self, addr: DmaAddr, data: &[u8]) -> Result<()> {
        let table = self.table.lock();
        let m = table.find(addr.0, data.len()).ok_or(VclError::Fault)?;
        if m.direction != Direction::Tx {
            return Err(VclError::Fault);
        }
        let at = (addr.0 - m.bus) as usize;
        // Safety: range checked against a live mapping of the host region
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), m.host.as_ptr().add(at), data.len()) };
        Ok(())
    }

    /// Device read from host memory (host-to-device transfer)
    pub fn read_bus(&self, addr: DmaAddr, out: &mut [u8]) -> Result<()> {
        let table = self.table.lock();
        let m = table.find(addr.0, out.len()).ok_or(VclError::Fault)?;
        if m.direction != Direction::Rx {
            return Err(VclError::Fault);
        }
        let at = (addr.0 - m.bus) as usize;
        // Safety: range checked against a live mapping of the host region
        unsafe { core::ptr::copy_nonoverlapping(m.host.as_ptr().add(at), out.as_mut_ptr(), out.len()) };
        Ok(())
    }
}

impl Default for IommuMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaMapper for IommuMapper {
    fn map(&self, region: HostRegion, direction: Direction) -> Result<DmaAddr> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || region.len == 0 {
            return Err(VclError::Fault);
        }

        let span = region.len.div_ceil(PAGE_SIZE) as u64 * PAGE_SIZE as u64;
        let mut table = self.table.lock();
        let bus = table.next;
        table.next = bus.checked_add(span).ok_or(VclError::Fault)?;
        table.live.push(Mapping { bus, host: region.ptr, len: region.len, direction });
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(DmaAddr(bus))
    }

    fn unmap(&self, addr: DmaAddr, len: usize, direction: Direction) {
        let mut table = self.table.lock();
        match table.live.iter().position(|m| m.bus == addr.0) {
            Some(i) => {
                let m = table.live.swap_remove(i);
                if m.len != len || m.direction != direction {
                    kwarn!("Unmap of {:#x} with {} bytes {} (mapped {} bytes {})",
                        addr.0, len, direction, m.len, m.direction);
                }
            }
            None => kwarn!("Unmap of unknown bus address {:#x}", addr.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(buf: &mut [u8]) -> HostRegion {
        HostRegion { ptr: NonNull::new(buf.as_mut_ptr()).unwrap(), len: buf.len() }
    }

    #[test]
    fn test_map_unmap() {
        let mapper = IommuMapper::new();
        let mut a = vec![0u8; 100];
        let mut b = vec![0u8; 5000];

        let da = mapper.map(region(&mut a), Direction::Tx).unwrap();
        let db = mapper.map(region(&mut b), Direction::Tx).unwrap();
        assert_eq!(da, DmaAddr(DEFAULT_BUS_BASE));
        assert_eq!(db.0, DEFAULT_BUS_BASE + PAGE_SIZE as u64);
        assert_eq!(da.hi(), 0);
        assert_eq!(mapper.live_mappings(), 2);

        mapper.unmap(da, 100, Direction::Tx);
        mapper.unmap(db, 5000, Direction::Tx);
        assert_eq!(mapper.live_mappings(), 0);
        assert_eq!(mapper.total_mappings(), 2);
    }

    #[test]
    fn test_device_access_through_table() {
        let mapper = IommuMapper::new();
        let mut host = vec![0u8; 64];
        let addr = mapper.map(region(&mut host), Direction::Tx).unwrap();

        mapper.write_bus(DmaAddr(addr.0 + 4), b"data").unwrap();
        // Wrong direction and out-of-range accesses fault
        let mut out = [0u8; 4];
        assert_eq!(mapper.read_bus(addr, &mut out), Err(VclError::Fault));
        assert_eq!(mapper.write_bus(DmaAddr(addr.0 + 62), b"xyz"), Err(VclError::Fault));

        mapper.unmap(addr, 64, Direction::Tx);
        assert_eq!(&host[4..8], b"data");
        assert_eq!(mapper.write_bus(addr, b"late"), Err(VclError::Fault));
    }

    #[test]
    fn test_fault_injection() {
        let mapper = IommuMapper::new();
        let mut host = vec![0u8; 16];
        mapper.fail_next(2);
        assert_eq!(mapper.map(region(&mut host), Direction::Rx), Err(VclError::Fault));
        assert_eq!(mapper.map(region(&mut host), Direction::Rx), Err(VclError::Fault));
        assert!(mapper.map(region(&mut host), Direction::Rx).is_ok());
    }

    #[test]
    fn test_high_window() {
        let mapper = IommuMapper::new();
        mapper.set_bus_offset(0x2_0000_0000);
        let mut host = vec![0u8; 16];
        let addr = mapper.map(region(&mut host), Direction::Rx).unwrap();
        assert_eq!(addr.hi(), 2);
        assert_eq!(addr.lo(), 0);
    }
}
