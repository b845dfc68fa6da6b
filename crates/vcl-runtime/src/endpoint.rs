//! Endpoint: the composition root
//!
//! An endpoint is one transceiver instance: its register window, the
//! channels discovered from the channel-info descriptor, and the device
//! nodes that expose them.
//!
//! # Bring-up
//!
//! 1. Read the endpoint channel-info word. All-ones means the device is
//!    not responding and bring-up fails.
//! 2. Walk channel ids `1..=total`. A channel whose info word reads
//!    all-ones is logged and skipped, as is any channel that is not
//!    host-facing. A host channel that is not strictly RX or TX aborts
//!    bring-up.
//! 3. Allocate each channel's buffer pool.
//!
//! Channel identity and direction never change afterwards.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use vcl_core::constants::MAX_CHANNEL_ID;
use vcl_core::regs::CHANNEL_INFO_REG;
use vcl_core::{
    kdebug, kerror, kinfo, kwarn, ChannelInfo, ChannelKind, ChannelRegister, ChannelRegistrar, ConfigError, DeviceNode,
    DmaMapper, EndpointInfo, NodeHandle, RegisterAccess, Result, VclError,
};

use crate::channel::{Channel, ChannelStats};
use crate::config::DriverConfig;
use crate::file::{AccessMode, ChannelFile};

/// Endpoint ids are handed out in probe order
static NEXT_ENDPOINT_ID: AtomicU32 = AtomicU32::new(0);

/// One transceiver instance
pub struct Endpoint {
    id: u32,

    /// Bus address of the register BAR
    bar: u64,

    info: EndpointInfo,
    regs: Arc<dyn RegisterAccess>,
    channels: Vec<Arc<Channel>>,

    /// Register port opener count (0 or 1)
    pub(crate) mmio_open: AtomicU32,
}

impl Endpoint {
    /// Discover channels behind `regs` and allocate their buffers.
    ///
    /// `bar` is the bus address of the register window, reported by the
    /// register port for channel pairing.
    pub fn probe(
        regs: Arc<dyn RegisterAccess>,
        mapper: Arc<dyn DmaMapper>,
        bar: u64,
        config: &DriverConfig,
    ) -> Result<Self> {
        config.validate()?;

        let id = NEXT_ENDPOINT_ID.fetch_add(1, Ordering::Relaxed);
        let info = EndpointInfo(regs.read32(CHANNEL_INFO_REG));
        if info.is_invalid() {
            kerror!("Failed to read from device (endpoint {}).", id);
            return Err(VclError::DeviceUnreachable);
        }

        let total = info.total_channels() as u32;
        // Register blocks are addressed by an 8-bit channel id
        if total > MAX_CHANNEL_ID {
            kerror!("Endpoint {} reports {} channels, more than the register map can address", id, total);
            return Err(VclError::InvalidConfig(ConfigError::InvalidValue(
                "channel count exceeds the 8-bit channel id space",
            )));
        }
        if total == 0 {
            kdebug!("No channels to set up");
        }

        let mut channels = Vec::with_capacity(info.host_channels());
        for chn in 1..=total {
            let ci = ChannelInfo(regs.read_channel(chn, ChannelRegister::Info));
            if ci.is_invalid() {
                kerror!("Failed to read channel info for id {}.", chn);
                continue;
            }
            if let ChannelKind::Other(kind) = ci.kind() {
                kdebug!(chn = chn; "Skipping channel of kind {}", kind);
                continue;
            }
            let Some(direction) = ci.dma_direction() else {
                kerror!(chn = chn; "Unsupported channel direction {:?}", ci.direction());
                return Err(VclError::UnsupportedDirection {
                    channel: chn,
                    bits: ci.direction_bits(),
                });
            };

            let minor = channels.len();
            let channel = Channel::new(chn, direction, minor, Arc::clone(&regs), Arc::clone(&mapper), config)?;
            channels.push(Arc::new(channel));
        }

        if channels.len() > info.host_channels() {
            kwarn!(
                "Endpoint {} reports {} host channels but {} were found",
                id,
                info.host_channels(),
                channels.len()
            );
        }

        kinfo!("Initialised endpoint {} with {} channel(s).", id, channels.len());

        Ok(Self {
            id,
            bar,
            info,
            regs,
            channels,
            mmio_open: AtomicU32::new(0),
        })
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn bar(&self) -> u64 {
        self.bar
    }

    pub fn info(&self) -> EndpointInfo {
        self.info
    }

    #[inline]
    pub fn regs(&self) -> &Arc<dyn RegisterAccess> {
        &self.regs
    }

    /// Interrupt vectors the device expects (host channels + 1)
    pub fn interrupt_vectors(&self) -> usize {
        self.info.interrupt_vectors()
    }

    /// Host channels in discovery order; the index is the node minor
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    pub fn channel(&self, minor: usize) -> Result<&Arc<Channel>> {
        self.channels.get(minor).ok_or(VclError::NoSuchChannel(minor))
    }

    /// Channel with hardware id `id`
    pub fn channel_by_id(&self, id: u32) -> Option<&Arc<Channel>> {
        self.channels.iter().find(|c| c.id() == id)
    }

    /// Open the channel at `minor`
    pub fn open(&self, minor: usize, mode: AccessMode) -> Result<ChannelFile> {
        ChannelFile::open(Arc::clone(self.channel(minor)?), mode)
    }

    /// Completion interrupt for `vector` (the channel id)
    pub fn handle_irq(&self, vector: u32) {
        match self.channel_by_id(vector) {
            Some(channel) => channel.handle_completion(),
            None => kwarn!("Endpoint {}: interrupt on vector {} with no channel", self.id, vector),
        }
    }

    pub fn stats(&self) -> Vec<ChannelStats> {
        self.channels.iter().map(|c| c.stats()).collect()
    }

    /// Nodes this endpoint exposes: the register port, then one per channel
    pub fn device_nodes(&self) -> Vec<DeviceNode> {
        let mut nodes = Vec::with_capacity(self.channels.len() + 1);
        nodes.push(DeviceNode::Registers { endpoint: self.id });
        for c in &self.channels {
            nodes.push(DeviceNode::Channel {
                endpoint: self.id,
                channel: c.id(),
                direction: c.direction(),
                minor: c.minor(),
            });
        }
        nodes
    }

    /// Publish every node through `registrar`.
    ///
    /// All or nothing: on failure, nodes registered so far are removed
    /// again in reverse order. The returned guard unregisters on drop.
    pub fn register_nodes(&self, registrar: Arc<dyn ChannelRegistrar>) -> Result<NodeRegistration> {
        let mut handles = Vec::new();
        for node in self.device_nodes() {
            match registrar.register(&node) {
                Ok(handle) => {
                    kdebug!("Registered {}", node);
                    handles.push(handle);
                }
                Err(e) => {
                    kerror!("Failed to register {}: {}", node, e);
                    for handle in handles.into_iter().rev() {
                        registrar.unregister(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(NodeRegistration { registrar, handles })
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("bar", &format_args!("{:#x}", self.bar))
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

/// Registered device nodes; unregistered in reverse order on drop
pub struct NodeRegistration {
    registrar: Arc<dyn ChannelRegistrar>,
    handles: Vec<NodeHandle>,
}

impl NodeRegistration {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistration")
            .field("handles", &self.handles)
            .finish_non_exhaustive()
    }
}

impl Drop for NodeRegistration {
    fn drop(&mut self) {
        for handle in self.handles.drain(..).rev() {
            self.registrar.unregister(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vcl_core::Direction;
    use vcl_module::{IommuMapper, NodeTable, RegisterFile};

    const HOST_RX: u32 = ChannelInfo::encode(0, 0);
    const HOST_TX: u32 = ChannelInfo::encode(1, 0);

    fn config() -> DriverConfig {
        DriverConfig::new()
            .buffer_count(2)
            .buffer_size(256)
            .read_timeout(Duration::from_millis(20))
            .write_timeout(Duration::from_millis(20))
    }

    /// Register file announcing `infos` as channels 1..=n
    fn device(host: u32, other: u32, infos: &[u32]) -> Arc<RegisterFile> {
        let regs = Arc::new(RegisterFile::new(0x1000));
        regs.write32(CHANNEL_INFO_REG, (host & 0xFF) | (other & 0xFF) << 16);
        for (i, info) in infos.iter().enumerate() {
            regs.write_channel(i as u32 + 1, ChannelRegister::Info, *info);
        }
        regs
    }

    fn probe(regs: Arc<RegisterFile>) -> Result<Endpoint> {
        Endpoint::probe(regs, Arc::new(IommuMapper::new()), 0xF000_0000, &config())
    }

    #[test]
    fn test_probe_discovers_host_channels() {
        let ep = probe(device(2, 0, &[HOST_RX, HOST_TX])).unwrap();
        assert_eq!(ep.channels().len(), 2);
        assert_eq!(ep.interrupt_vectors(), 3);
        assert_eq!(ep.channel(0).unwrap().direction(), Direction::Rx);
        assert_eq!(ep.channel(1).unwrap().direction(), Direction::Tx);
        assert_eq!(ep.channel(1).unwrap().id(), 2);
        assert!(matches!(ep.channel(2), Err(VclError::NoSuchChannel(2))));
    }

    #[test]
    fn test_probe_skips_other_kinds_and_dead_channels() {
        let other = ChannelInfo::encode(0, 2);
        let ep = probe(device(2, 2, &[HOST_TX, other, 0xFFFF_FFFF, HOST_RX])).unwrap();
        let ids: Vec<u32> = ep.channels().iter().map(|c| c.id()).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(ep.channel(1).unwrap().minor(), 1);
        assert!(ep.channel_by_id(2).is_none());
    }

    #[test]
    fn test_probe_rejects_bidirectional() {
        let bi = ChannelInfo::encode(2, 0);
        let err = probe(device(2, 0, &[HOST_RX, bi])).unwrap_err();
        assert_eq!(err, VclError::UnsupportedDirection { channel: 2, bits: 2 });
    }

    #[test]
    fn test_probe_unreachable_device() {
        let regs = Arc::new(RegisterFile::new(0x1000));
        regs.write32(CHANNEL_INFO_REG, 0xFFFF_FFFF);
        assert_eq!(probe(regs).unwrap_err(), VclError::DeviceUnreachable);
    }

    #[test]
    fn test_probe_no_channels() {
        let ep = probe(device(0, 0, &[])).unwrap();
        assert!(ep.channels().is_empty());
        assert_eq!(ep.device_nodes().len(), 1);
    }

    #[test]
    fn test_probe_rejects_unaddressable_channel_ids() {
        // 255 + 255 ids: anything past 0xFF would alias another block
        let err = probe(device(0xFF, 0xFF, &[])).unwrap_err();
        assert!(matches!(err, VclError::InvalidConfig(_)));

        let ep = probe(device(0xFF, 0, &[])).unwrap();
        assert!(ep.channels().len() <= 0xFF);
    }

    #[test]
    fn test_endpoint_ids_increase() {
        let a = probe(device(0, 0, &[])).unwrap();
        let b = probe(device(0, 0, &[])).unwrap();
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_open_by_minor() {
        let ep = probe(device(2, 0, &[HOST_RX, HOST_TX])).unwrap();
        let _w = ep.open(0, AccessMode::WriteOnly).unwrap();
        assert_eq!(ep.open(0, AccessMode::WriteOnly).unwrap_err(), VclError::Busy);
        assert!(matches!(ep.open(1, AccessMode::WriteOnly), Err(VclError::BadMode { .. })));
        assert!(ep.open(1, AccessMode::ReadOnly).is_ok());
    }

    #[test]
    fn test_handle_irq_routes_by_id() {
        let ep = probe(device(2, 0, &[HOST_RX, HOST_TX])).unwrap();
        let tx = Arc::clone(ep.channel(1).unwrap());
        tx.request_idle_buffers(16).unwrap();

        ep.handle_irq(2);
        assert_eq!(tx.queue_lengths(), (1, 0, 1));
        // Unknown vector and the RX channel's spurious interrupt are harmless
        ep.handle_irq(9);
        ep.handle_irq(1);
        assert_eq!(ep.channel(0).unwrap().anomalies(), 1);
    }

    #[test]
    fn test_register_nodes() {
        let ep = probe(device(2, 0, &[HOST_RX, HOST_TX])).unwrap();
        let table = Arc::new(NodeTable::new());
        let reg = ep.register_nodes(table.clone()).unwrap();
        assert_eq!(reg.len(), 3);
        assert!(format!("{:?}", reg).starts_with("NodeRegistration"));

        let names = table.names();
        assert!(names.contains(&format!("vcl_{}", ep.id())));
        assert!(names.contains(&format!("vcl_{}_rx_1", ep.id())));
        assert!(names.contains(&format!("vcl_{}_tx_2", ep.id())));

        drop(reg);
        assert!(table.names().is_empty());
    }

    #[test]
    fn test_register_nodes_rolls_back() {
        let ep = probe(device(2, 0, &[HOST_RX, HOST_TX])).unwrap();
        let table = Arc::new(NodeTable::new());
        table.fail_after(2);

        let err = ep.register_nodes(table.clone()).unwrap_err();
        assert_eq!(err, VclError::Registration(libc::ENOSPC));
        assert!(table.names().is_empty());
    }
}
