//! DMA channel
//!
//! A channel owns its buffer pool, the three queues the pool cycles
//! through, and the wait queue callers sleep on. The lifecycle itself is
//! split across `submit` (host hands a buffer to the device), `completion`
//! (device hands it back) and `file` (the blocking byte-stream contract).
//!
//! # Locking
//!
//! `queues` is a spin lock shared by caller threads and the completion
//! handler. It covers queue membership and descriptor register writes.
//! It is never held across a wait, a user copy, or a caller-side `map()`.
//!
//! A buffer popped by a caller is "in hand" until it is pushed again;
//! `idle + active + serviced == buffer_count` holds whenever no call is
//! between those two points.

use core::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vcl_core::{kdebug, DmaMapper, Direction, RegisterAccess, Result, SpinLock};

use crate::buffer::Buffer;
use crate::config::DriverConfig;
use crate::queue::{ChannelQueues, Queue, QueueCounts};
use crate::wait::WaitQueue;

/// One unidirectional DMA channel
pub struct Channel {
    /// Hardware channel id (1-based, also the interrupt vector)
    id: u32,

    /// Fixed at bring-up
    direction: Direction,

    /// Index in the endpoint's channel array
    minor: usize,

    pub(crate) queues: SpinLock<ChannelQueues>,
    counts: Arc<QueueCounts>,
    pub(crate) waitq: WaitQueue,

    pub(crate) regs: Arc<dyn RegisterAccess>,
    pub(crate) mapper: Arc<dyn DmaMapper>,

    /// Descriptors programmed so far; only advanced under `queues`
    pub(crate) transaction_id: AtomicU64,

    /// 0 or 1
    open_count: AtomicU32,

    /// Spurious completions, oversized transfer counts, failed promotions
    pub(crate) anomalies: AtomicU64,

    buffer_count: usize,
    buffer_size: usize,
    pub(crate) write_timeout: Duration,
    pub(crate) read_timeout: Duration,
}

impl Channel {
    /// Create a channel and allocate its buffer pool into `idle`.
    pub fn new(
        id: u32,
        direction: Direction,
        minor: usize,
        regs: Arc<dyn RegisterAccess>,
        mapper: Arc<dyn DmaMapper>,
        config: &DriverConfig,
    ) -> Result<Self> {
        config.validate()?;

        let mut queues = ChannelQueues::new(config.buffer_count);
        for n in 0..config.buffer_count {
            // validate() bounds buffer_count to u8
            let buf = Buffer::new(n as u8, config.buffer_size)?;
            kdebug!(chn = id; "Initialised buffer {}", n);
            queues.push(Queue::Idle, buf);
        }
        let counts = queues.counts();

        Ok(Self {
            id,
            direction,
            minor,
            queues: SpinLock::new(queues),
            counts,
            waitq: WaitQueue::new(),
            regs,
            mapper,
            transaction_id: AtomicU64::new(0),
            open_count: AtomicU32::new(0),
            anomalies: AtomicU64::new(0),
            buffer_count: config.buffer_count,
            buffer_size: config.buffer_size,
            write_timeout: config.write_timeout,
            read_timeout: config.read_timeout,
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn minor(&self) -> usize {
        self.minor
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Approximate queue length, without locking
    #[inline]
    pub fn count(&self, queue: Queue) -> usize {
        self.counts.get(queue)
    }

    pub fn transaction_id(&self) -> u64 {
        self.transaction_id.load(Ordering::Relaxed)
    }

    pub fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether a caller could make progress: a buffer is idle or serviced
    pub fn is_ready(&self) -> bool {
        let q = self.queues.lock();
        q.has_any(Queue::Idle) || q.has_any(Queue::Serviced)
    }

    /// Exact `(idle, active, serviced)` taken under the lock
    pub fn queue_lengths(&self) -> (usize, usize, usize) {
        let q = self.queues.lock();
        (q.len(Queue::Idle), q.len(Queue::Active), q.len(Queue::Serviced))
    }

    /// Buffer ids of `queue`, head first
    pub fn queue_ids(&self, queue: Queue) -> Vec<u8> {
        self.queues.lock().ids(queue)
    }

    /// Diagnostic snapshot
    pub fn stats(&self) -> ChannelStats {
        let (idle, active, serviced) = self.counts.snapshot();
        ChannelStats {
            id: self.id,
            direction: self.direction,
            idle,
            active,
            serviced,
            transaction_id: self.transaction_id(),
            anomalies: self.anomalies(),
        }
    }

    /// Claim the single opener slot
    pub(crate) fn try_claim(&self) -> bool {
        self.open_count
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release(&self) {
        self.open_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn is_open(&self) -> bool {
        self.open_count.load(Ordering::Acquire) != 0
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("minor", &self.minor)
            .field("counts", &self.counts.snapshot())
            .finish_non_exhaustive()
    }
}

/// Read-only diagnostics of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub id: u32,
    pub direction: Direction,
    pub idle: usize,
    pub active: usize,
    pub serviced: usize,
    pub transaction_id: u64,
    pub anomalies: u64,
}

impl fmt::Display for ChannelStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id={} dir={} idle={} active={} serviced={} transaction={} anomalies={}",
            self.id, self.direction, self.idle, self.active, self.serviced, self.transaction_id, self.anomalies
        )
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use vcl_core::{ChannelRegister, DmaAddr};
    use vcl_module::{IommuMapper, RegisterFile};

    /// Small pool so tests do not allocate megabytes
    pub fn small_config(count: usize, size: usize) -> DriverConfig {
        DriverConfig::new()
            .buffer_count(count)
            .buffer_size(size)
            .write_timeout(Duration::from_millis(50))
            .read_timeout(Duration::from_millis(50))
    }

    pub struct Rig {
        pub channel: Arc<Channel>,
        pub regs: Arc<RegisterFile>,
        pub mapper: Arc<IommuMapper>,
    }

    /// A channel over an in-memory register file, no device behind it
    pub fn rig(direction: Direction, count: usize, size: usize) -> Rig {
        rig_with(direction, &small_config(count, size))
    }

    pub fn rig_with(direction: Direction, config: &DriverConfig) -> Rig {
        let regs = Arc::new(RegisterFile::new(0x1000));
        let mapper = Arc::new(IommuMapper::new());
        let channel = Channel::new(
            1,
            direction,
            0,
            regs.clone() as Arc<dyn RegisterAccess>,
            mapper.clone() as Arc<dyn DmaMapper>,
            config,
        )
        .unwrap();
        Rig { channel: Arc::new(channel), regs, mapper }
    }

    /// Descriptor the device was last given: bus address and size
    pub fn descriptor(rig: &Rig) -> (DmaAddr, usize) {
        let lo = rig.regs.read_channel(1, ChannelRegister::AddrLo) as u64;
        let hi = rig.regs.read_channel(1, ChannelRegister::AddrHi) as u64;
        let size = rig.regs.read_channel(1, ChannelRegister::Size) as usize;
        (DmaAddr(hi << 32 | lo), size)
    }

    /// Play the device: report `transferred` bytes and run the handler
    pub fn complete(rig: &Rig, transferred: u32) {
        rig.regs.write_channel(rig.channel.id(), ChannelRegister::Transferred, transferred);
        rig.channel.handle_completion();
    }

    /// Play a TX device: write `data` into the running buffer and complete it
    pub fn produce(rig: &Rig, data: &[u8]) {
        let (addr, size) = descriptor(rig);
        assert!(data.len() <= size, "device asked for {} bytes, got {}", size, data.len());
        rig.mapper.write_bus(addr, data).unwrap();
        complete(rig, data.len() as u32);
    }

    pub fn assert_pool_intact(channel: &Channel) {
        let (idle, active, serviced) = channel.queue_lengths();
        assert_eq!(idle + active + serviced, channel.buffer_count(), "buffer lost or duplicated");
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_new_channel_all_idle() {
        let rig = rig(Direction::Tx, 3, 256);
        let ch = &rig.channel;
        assert_eq!(ch.queue_lengths(), (3, 0, 0));
        assert_eq!(ch.queue_ids(Queue::Idle), vec![0, 1, 2]);
        assert_eq!(ch.transaction_id(), 0);
        assert!(ch.is_ready());
        assert_pool_intact(ch);
    }

    #[test]
    fn test_single_opener_slot() {
        let rig = rig(Direction::Rx, 1, 64);
        assert!(rig.channel.try_claim());
        assert!(!rig.channel.try_claim());
        rig.channel.release();
        assert!(!rig.channel.is_open());
        assert!(rig.channel.try_claim());
    }

    #[test]
    fn test_stats_display() {
        let rig = rig(Direction::Tx, 2, 64);
        let stats = rig.channel.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(
            stats.to_string(),
            "id=1 dir=tx idle=2 active=0 serviced=0 transaction=0 anomalies=0"
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let regs = Arc::new(vcl_module::RegisterFile::new(0x100));
        let mapper = Arc::new(vcl_module::IommuMapper::new());
        let err = Channel::new(1, Direction::Rx, 0, regs, mapper, &DriverConfig::new().buffer_count(0))
            .unwrap_err();
        assert!(matches!(err, vcl_core::VclError::InvalidConfig(_)));
    }
}
