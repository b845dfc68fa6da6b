//! `LoopbackDevice` - simulated transceiver.
//!
//! Looks to the driver like a real endpoint: a register window announcing
//! host channels, a DMA engine started by size-register writes, and one
//! completion interrupt per finished transaction.
//!
//! Data written on any RX channel lands in a loopback FIFO; TX channels
//! are served from that FIFO. A TX transaction with nothing to send stays
//! pending until data arrives, like the hardware waiting on its stream.
//!
//! The engine runs on its own thread. Size-register writes only push a
//! doorbell onto a lock-free queue, so `write32` never blocks the driver.
//!
//! # Register behavior
//!
//! - A write to `AddrLo` clears the latched high address; the driver only
//!   writes `AddrHi` when it is non-zero.
//! - A write to `Size` starts a transaction with the latched address.
//! - `Transferred` is set right before the interrupt is raised.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use vcl_core::regs::CHANNEL_INFO_REG;
use vcl_core::{
    kdebug, kwarn, ChannelInfo, ChannelRegister, Direction, DmaAddr, InterruptSink, RegisterAccess, Result,
    SpinLock, VclError,
};

use crate::iommu_mapper::IommuMapper;
use crate::register_file::RegisterFile;

/// Doorbells the engine can have outstanding
const DOORBELL_DEPTH: usize = 1024;

/// Idle poll interval of the engine thread
const IDLE_PARK: Duration = Duration::from_millis(1);

/// Register window size (channel ids up to 0xFF)
const WINDOW_LEN: usize = 0x100 << 6;

#[derive(Debug, Clone, Copy)]
struct Job {
    addr: DmaAddr,
    size: usize,
}

/// Engine counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopbackStats {
    /// Transactions completed
    pub transactions: u64,
    /// Bytes moved through the FIFO
    pub bytes: u64,
    /// Size writes while the channel still had a transaction running
    pub overlaps: u64,
    /// Transfers the mapper refused
    pub faults: u64,
}

struct Inner {
    regs: RegisterFile,
    mapper: Arc<IommuMapper>,
    sink: Arc<dyn InterruptSink>,

    /// Direction by channel id; `None` for ids that are not host channels
    directions: Vec<Option<Direction>>,

    doorbells: ArrayQueue<(u32, Job)>,
    /// Running transaction per channel id
    pending: SpinLock<Vec<Option<Job>>>,
    fifo: SpinLock<VecDeque<u8>>,

    stalled: AtomicBool,
    shutdown: AtomicBool,
    thread: OnceLock<Thread>,

    transactions: AtomicU64,
    bytes: AtomicU64,
    overlaps: AtomicU64,
    faults: AtomicU64,
}

pub struct LoopbackDevice {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackDevice {
    /// Build a device with host channels `1..=directions.len()` and start
    /// its engine.
    ///
    /// RX channels are announced in channel-info byte 0, TX channels in
    /// byte 1. Completions go to `sink`.
    pub fn new(directions: &[Direction], mapper: Arc<IommuMapper>, sink: Arc<dyn InterruptSink>) -> Result<Arc<Self>> {
        let regs = RegisterFile::new(WINDOW_LEN);

        let rx = directions.iter().filter(|d| **d == Direction::Rx).count() as u32;
        let tx = directions.len() as u32 - rx;
        regs.set(CHANNEL_INFO_REG, (rx & 0xFF) | (tx & 0xFF) << 8);

        let mut by_id = vec![None; directions.len() + 1];
        for (i, d) in directions.iter().enumerate() {
            let id = i as u32 + 1;
            let bits = match d {
                Direction::Rx => 0,
                Direction::Tx => 1,
            };
            regs.set(ChannelRegister::Info.offset(id), ChannelInfo::encode(bits, 0));
            by_id[id as usize] = Some(*d);
        }

        let inner = Arc::new(Inner {
            regs,
            mapper,
            sink,
            pending: SpinLock::new(vec![None; by_id.len()]),
            directions: by_id,
            doorbells: ArrayQueue::new(DOORBELL_DEPTH),
            fifo: SpinLock::new(VecDeque::new()),
            stalled: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            thread: OnceLock::new(),
            transactions: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            overlaps: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        });

        let engine = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("vcl-loopback".into())
            .spawn(move || engine_loop(engine))
            .map_err(|e| VclError::Os(e.raw_os_error().unwrap_or(libc::EAGAIN)))?;
        let _ = inner.thread.set(handle.thread().clone());

        Ok(Arc::new(Self {
            inner,
            worker: Mutex::new(Some(handle)),
        }))
    }

    /// Freeze the engine: no transaction completes while stalled
    pub fn set_stalled(&self, stalled: bool) {
        self.inner.stalled.store(stalled, Ordering::SeqCst);
        if !stalled {
            self.inner.kick();
        }
    }

    /// Bytes waiting in the loopback FIFO
    pub fn fifo_len(&self) -> usize {
        self.inner.fifo.lock().len()
    }

    /// Feed bytes into the FIFO as if an RX channel had sent them
    pub fn inject(&self, data: &[u8]) {
        self.inner.fifo.lock().extend(data.iter().copied());
        self.inner.kick();
    }

    pub fn stats(&self) -> LoopbackStats {
        LoopbackStats {
            transactions: self.inner.transactions.load(Ordering::Relaxed),
            bytes: self.inner.bytes.load(Ordering::Relaxed),
            overlaps: self.inner.overlaps.load(Ordering::Relaxed),
            faults: self.inner.faults.load(Ordering::Relaxed),
        }
    }

    /// Direct access to the register window (device side)
    pub fn registers(&self) -> &RegisterFile {
        &self.inner.regs
    }
}

impl RegisterAccess for LoopbackDevice {
    fn read32(&self, offset: usize) -> u32 {
        self.inner.regs.read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        let inner = &self.inner;
        inner.regs.write32(offset, value);

        let id = (offset >> 6) as u32;
        let Some(Some(_)) = inner.directions.get(id as usize) else {
            return;
        };

        match ((offset >> 2) & 0xF) as u32 {
            i if i == ChannelRegister::AddrLo.index() => {
                inner.regs.set(ChannelRegister::AddrHi.offset(id), 0);
            }
            i if i == ChannelRegister::Size.index() => {
                let lo = inner.regs.read32(ChannelRegister::AddrLo.offset(id)) as u64;
                let hi = inner.regs.read32(ChannelRegister::AddrHi.offset(id)) as u64;
                let job = Job { addr: DmaAddr(hi << 32 | lo), size: value as usize };
                if inner.doorbells.push((id, job)).is_err() {
                    kwarn!(chn = id; "Loopback doorbell queue full, transaction lost");
                    return;
                }
                inner.kick();
            }
            _ => {}
        }
    }
}

impl Drop for LoopbackDevice {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.kick();
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for LoopbackDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackDevice")
            .field("channels", &(self.inner.directions.len() - 1))
            .field("stats", &self.stats())
            .finish()
    }
}

impl Inner {
    fn kick(&self) {
        if let Some(t) = self.thread.get() {
            t.unpark();
        }
    }

    /// Latch doorbells into the per-channel pending slots
    fn accept_doorbells(&self) {
        while let Some((id, job)) = self.doorbells.pop() {
            let mut pending = self.pending.lock();
            if pending[id as usize].is_some() {
                self.overlaps.fetch_add(1, Ordering::Relaxed);
                kwarn!(chn = id; "Descriptor written while a transaction is running");
            }
            pending[id as usize] = Some(job);
        }
    }

    /// Run every transaction that can make progress. Returns true if any did.
    fn step(&self) -> bool {
        let mut progressed = false;
        for (id, dir) in self.directions.iter().enumerate() {
            let Some(dir) = dir else { continue };
            let Some(job) = self.pending.lock()[id].take() else { continue };

            let done = match dir {
                Direction::Rx => self.consume(id as u32, job),
                Direction::Tx => self.produce(id as u32, job),
            };
            match done {
                Some(n) => {
                    self.complete(id as u32, n);
                    progressed = true;
                }
                None => self.pending.lock()[id] = Some(job),
            }
        }
        progressed
    }

    /// Host-to-device: pull the buffer into the FIFO
    fn consume(&self, id: u32, job: Job) -> Option<usize> {
        let mut data = vec![0u8; job.size];
        if let Err(e) = self.mapper.read_bus(job.addr, &mut data) {
            self.faults.fetch_add(1, Ordering::Relaxed);
            kwarn!(chn = id; "Loopback read of {:#x} failed: {}", job.addr.0, e);
            return Some(0);
        }
        self.fifo.lock().extend(data);
        Some(job.size)
    }

    /// Device-to-host: fill the buffer from the FIFO, or wait for data
    fn produce(&self, id: u32, job: Job) -> Option<usize> {
        let data: Vec<u8> = {
            let mut fifo = self.fifo.lock();
            if fifo.is_empty() {
                return None;
            }
            let n = job.size.min(fifo.len());
            fifo.drain(..n).collect()
        };
        if let Err(e) = self.mapper.write_bus(job.addr, &data) {
            self.faults.fetch_add(1, Ordering::Relaxed);
            kwarn!(chn = id; "Loopback write to {:#x} failed: {}", job.addr.0, e);
            // Put the bytes back so nothing is lost
            let mut fifo = self.fifo.lock();
            for b in data.into_iter().rev() {
                fifo.push_front(b);
            }
            return Some(0);
        }
        Some(data.len())
    }

    fn complete(&self, id: u32, transferred: usize) {
        self.regs.set(ChannelRegister::Transferred.offset(id), transferred as u32);
        self.transactions.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(transferred as u64, Ordering::Relaxed);
        kdebug!(chn = id; "Loopback transaction done ({} bytes)", transferred);
        self.sink.raise(id);
    }
}

fn engine_loop(inner: Arc<Inner>) {
    while !inner.shutdown.load(Ordering::SeqCst) {
        inner.accept_doorbells();
        if inner.stalled.load(Ordering::SeqCst) || !inner.step() {
            thread::park_timeout(IDLE_PARK);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::NonNull;
    use std::time::Instant;
    use vcl_core::{DmaMapper, HostRegion};

    /// Counts raised vectors
    #[derive(Default)]
    struct Recorder {
        raised: SpinLock<Vec<u32>>,
    }

    impl InterruptSink for Recorder {
        fn raise(&self, vector: u32) {
            self.raised.lock().push(vector);
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn region(buf: &mut [u8]) -> HostRegion {
        HostRegion { ptr: NonNull::new(buf.as_mut_ptr()).unwrap(), len: buf.len() }
    }

    #[test]
    fn test_channel_info_layout() {
        let mapper = Arc::new(IommuMapper::new());
        let dev = LoopbackDevice::new(
            &[Direction::Rx, Direction::Tx, Direction::Tx],
            mapper,
            Arc::new(Recorder::default()),
        )
        .unwrap();
        assert_eq!(dev.read32(CHANNEL_INFO_REG), 0x0000_0201);
        assert_eq!(ChannelInfo(dev.read_channel(1, ChannelRegister::Info)).dma_direction(), Some(Direction::Rx));
        assert_eq!(ChannelInfo(dev.read_channel(3, ChannelRegister::Info)).dma_direction(), Some(Direction::Tx));
    }

    #[test]
    fn test_rx_then_tx_loops_data() {
        let mapper = Arc::new(IommuMapper::new());
        let irq = Arc::new(Recorder::default());
        let dev = LoopbackDevice::new(&[Direction::Rx, Direction::Tx], Arc::clone(&mapper), irq.clone()).unwrap();

        let mut src = b"loopback!".to_vec();
        let rx_addr = mapper.map(region(&mut src), Direction::Rx).unwrap();
        dev.write_channel(1, ChannelRegister::AddrLo, rx_addr.lo());
        dev.write_channel(1, ChannelRegister::Size, 9);
        wait_for(|| irq.raised.lock().len() == 1);
        assert_eq!(dev.read_channel(1, ChannelRegister::Transferred), 9);
        mapper.unmap(rx_addr, 9, Direction::Rx);

        let mut dst = vec![0u8; 32];
        let tx_addr = mapper.map(region(&mut dst), Direction::Tx).unwrap();
        dev.write_channel(2, ChannelRegister::AddrLo, tx_addr.lo());
        dev.write_channel(2, ChannelRegister::Size, 32);
        wait_for(|| irq.raised.lock().len() == 2);
        assert_eq!(dev.read_channel(2, ChannelRegister::Transferred), 9);
        mapper.unmap(tx_addr, 32, Direction::Tx);

        assert_eq!(&dst[..9], b"loopback!");
        assert_eq!(*irq.raised.lock(), vec![1, 2]);
        assert_eq!(dev.stats().overlaps, 0);
    }

    #[test]
    fn test_tx_waits_for_data() {
        let mapper = Arc::new(IommuMapper::new());
        let irq = Arc::new(Recorder::default());
        let dev = LoopbackDevice::new(&[Direction::Tx], Arc::clone(&mapper), irq.clone()).unwrap();

        let mut dst = vec![0u8; 8];
        let addr = mapper.map(region(&mut dst), Direction::Tx).unwrap();
        dev.write_channel(1, ChannelRegister::AddrLo, addr.lo());
        dev.write_channel(1, ChannelRegister::Size, 8);

        thread::sleep(Duration::from_millis(20));
        assert!(irq.raised.lock().is_empty());

        dev.inject(b"abcd");
        wait_for(|| irq.raised.lock().len() == 1);
        assert_eq!(dev.read_channel(1, ChannelRegister::Transferred), 4);
        mapper.unmap(addr, 8, Direction::Tx);
        assert_eq!(&dst[..4], b"abcd");
    }

    #[test]
    fn test_stall() {
        let mapper = Arc::new(IommuMapper::new());
        let irq = Arc::new(Recorder::default());
        let dev = LoopbackDevice::new(&[Direction::Tx], Arc::clone(&mapper), irq.clone()).unwrap();
        dev.inject(b"xyz");
        dev.set_stalled(true);

        let mut dst = vec![0u8; 8];
        let addr = mapper.map(region(&mut dst), Direction::Tx).unwrap();
        dev.write_channel(1, ChannelRegister::AddrLo, addr.lo());
        dev.write_channel(1, ChannelRegister::Size, 8);
        thread::sleep(Duration::from_millis(20));
        assert!(irq.raised.lock().is_empty());

        dev.set_stalled(false);
        wait_for(|| irq.raised.lock().len() == 1);
        mapper.unmap(addr, 8, Direction::Tx);
    }
}
