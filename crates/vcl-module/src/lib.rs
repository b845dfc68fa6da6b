//! # vcl-module - Default implementations
//!
//! This crate provides a default implementation for every `vcl-core`
//! trait, plus a simulated transceiver to drive the runtime without
//! hardware.
//!
//! ## Default stack
//!
//! | Trait             | Default Impl     | Notes                                |
//! |-------------------|------------------|--------------------------------------|
//! | RegisterAccess    | MmioWindow       | PCI BAR resource file, volatile I/O  |
//! | RegisterAccess    | RegisterFile     | In-memory window with write counts   |
//! | RegisterAccess    | LoopbackDevice   | RegisterFile + simulated DMA engine  |
//! | DmaMapper         | IommuMapper      | Bus window + translation table       |
//! | ChannelRegistrar  | NodeTable        | In-memory node names                 |

pub mod register_file;
#[cfg(unix)]
pub mod mmio_window;
pub mod iommu_mapper;
pub mod loopback;
pub mod node_table;

pub use register_file::{RegisterFile, RegisterWrite};
#[cfg(unix)]
pub use mmio_window::MmioWindow;
pub use iommu_mapper::IommuMapper;
pub use loopback::{LoopbackDevice, LoopbackStats};
pub use node_table::NodeTable;
