//! Register map and channel descriptor decoding
//!
//! Every channel owns a 64-byte register block at `id << 6` inside the
//! endpoint's BAR. Registers are 32 bits wide and word-indexed:
//!
//! ```text
//! offset = (id & 0xFF) << 6 | (index & 0xF) << 2
//!
//! index  register
//!   0    address low     (descriptor)
//!   1    address high    (descriptor, written only when non-zero)
//!   2    size            (descriptor, writing it starts the transfer)
//!   3    mode
//!   4    transferred     (bytes moved by the last transaction)
//!   5    channel info
//!  15    data
//! ```
//!
//! Channel 0 is never a DMA channel; its block holds the endpoint
//! registers (`ENDPOINT_ID_REG`, `CHANNEL_INFO_REG`).

use crate::dma::Direction;

/// Endpoint identification register
pub const ENDPOINT_ID_REG: usize = 0x20;

/// Endpoint channel-info register (per-class channel counts)
pub const CHANNEL_INFO_REG: usize = 0x28;

/// Word-indexed per-channel registers
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelRegister {
    AddrLo = 0,
    AddrHi = 1,
    Size = 2,
    Mode = 3,
    Transferred = 4,
    Info = 5,
    Data = 15,
}

impl ChannelRegister {
    /// Word index within the channel block
    #[inline]
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Byte offset of this register for channel `id`
    #[inline]
    pub const fn offset(self, id: u32) -> usize {
        register_offset(id, self as u32)
    }
}

/// Byte offset of word `index` in the block of channel `id`
#[inline]
pub const fn register_offset(id: u32, index: u32) -> usize {
    (((id & 0xFF) << 6) + ((index & 0xF) << 2)) as usize
}

/// Endpoint channel-info word
///
/// One byte per channel class. Bytes 0 and 1 count the host-facing
/// channels; bytes 2 and 3 count channels of other classes which still
/// occupy channel ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo(pub u32);

impl EndpointInfo {
    #[inline]
    fn byte(&self, n: u32) -> u32 {
        (self.0 >> (n * 8)) & 0xFF
    }

    /// Channels facing the host DMA engine
    pub fn host_channels(&self) -> usize {
        (self.byte(0) + self.byte(1)) as usize
    }

    /// All channel ids present on the endpoint (ids run `1..=total`)
    pub fn total_channels(&self) -> usize {
        (self.byte(0) + self.byte(1) + self.byte(2) + self.byte(3)) as usize
    }

    /// Interrupt vectors the endpoint expects: one per host channel plus one
    pub fn interrupt_vectors(&self) -> usize {
        self.host_channels() + 1
    }

    /// Whether the read came back from a dead window
    pub fn is_invalid(&self) -> bool {
        self.0 == crate::constants::INVALID_READ
    }
}

/// Direction field of a channel info word, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoDirection {
    Rx,
    Tx,
    Bidirectional,
    None,
}

/// Kind field of a channel info word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Host-facing DMA channel
    Host,
    /// Anything else (device-to-device, misc); not driven by the host
    Other(u8),
}

/// Per-channel info word (`ChannelRegister::Info`)
///
/// Bits `[9:8]` carry the direction, bits `[12:10]` the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo(pub u32);

impl ChannelInfo {
    /// Raw direction bits
    #[inline]
    pub fn direction_bits(&self) -> u32 {
        (self.0 >> 8) & 0x3
    }

    pub fn direction(&self) -> InfoDirection {
        match self.direction_bits() {
            0 => InfoDirection::Rx,
            1 => InfoDirection::Tx,
            2 => InfoDirection::Bidirectional,
            _ => InfoDirection::None,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        match (self.0 >> 10) & 0x7 {
            0 => ChannelKind::Host,
            k => ChannelKind::Other(k as u8),
        }
    }

    /// Direction the host pipeline can drive, if any
    pub fn dma_direction(&self) -> Option<Direction> {
        match self.direction() {
            InfoDirection::Rx => Some(Direction::Rx),
            InfoDirection::Tx => Some(Direction::Tx),
            InfoDirection::Bidirectional | InfoDirection::None => None,
        }
    }

    /// Whether the read came back from a dead window
    pub fn is_invalid(&self) -> bool {
        self.0 == crate::constants::INVALID_READ
    }

    /// Encode an info word (used by device models)
    pub const fn encode(direction_bits: u32, kind: u32) -> u32 {
        ((direction_bits & 0x3) << 8) | ((kind & 0x7) << 10)
    }
}
