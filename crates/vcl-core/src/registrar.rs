//! Device node registration abstraction.
//!
//! Character-device and sysfs plumbing is glue; the endpoint only needs to
//! announce which nodes exist. A `ChannelRegistrar` receives one
//! `DeviceNode` per channel plus one for the endpoint's register port.
//!
//! # Implementors
//!
//! - `NodeTable` (vcl-module): in-memory name table, lookups by name.

use core::fmt;

use crate::dma::Direction;
use crate::error::Result;

/// A node to expose to user code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNode {
    /// Byte-stream node of one DMA channel
    Channel {
        endpoint: u32,
        channel: u32,
        direction: Direction,
        /// Index into the endpoint's channel array
        minor: usize,
    },
    /// Raw register port of an endpoint
    Registers { endpoint: u32 },
}

impl DeviceNode {
    /// Node name: `vcl_<ep>_rx_<id>`, `vcl_<ep>_tx_<id>` or `vcl_<ep>`
    pub fn name(&self) -> String {
        match self {
            DeviceNode::Channel { endpoint, channel, direction, .. } => {
                format!("vcl_{}_{}_{}", endpoint, direction.label(), channel)
            }
            DeviceNode::Registers { endpoint } => format!("vcl_{}", endpoint),
        }
    }
}

impl fmt::Display for DeviceNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Opaque handle for a registered node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u64);

/// Publishes device nodes.
///
/// **Contract:**
/// - `register()` is called during bring-up only, never from the I/O path.
/// - On failure the endpoint unregisters every node it registered before,
///   in reverse order.
pub trait ChannelRegistrar: Send + Sync {
    /// Publish `node`; returns a handle for later removal.
    fn register(&self, node: &DeviceNode) -> Result<NodeHandle>;

    /// Remove a node published by `register()`.
    fn unregister(&self, handle: NodeHandle);
}
