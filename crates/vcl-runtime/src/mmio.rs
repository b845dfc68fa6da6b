//! Raw register port of an endpoint
//!
//! Low-level access for tooling: peek and poke any channel register, and
//! pair a channel with a channel on another endpoint so the two devices
//! stream to each other without the host in the data path.
//!
//! Register offsets here are word indices inside a channel block, the same
//! indices `ChannelRegister` uses.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use vcl_core::regs::register_offset;
use vcl_core::{kdebug, kerror, ChannelRegister, Result, VclError};

use crate::endpoint::Endpoint;

/// Mode register value that routes a channel to a peer device
const MODE_PEER: u32 = 1;

/// Where the peer channel lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairInfo {
    /// Bus address of the peer endpoint's register BAR
    pub other_bar: u64,
    /// Peer channel id
    pub other_id: u32,
    /// Channel id on this endpoint
    pub this_id: u32,
}

/// Single-opener register port
#[derive(Debug)]
pub struct MmioPort {
    endpoint: Arc<Endpoint>,
}

impl MmioPort {
    /// Open the port; `Busy` if someone else has it.
    pub fn open(endpoint: Arc<Endpoint>) -> Result<Self> {
        if endpoint
            .mmio_open
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            kerror!("Register port of endpoint {} is busy", endpoint.id());
            return Err(VclError::Busy);
        }
        Ok(Self { endpoint })
    }

    /// Bus address of this endpoint's register BAR
    pub fn bar(&self) -> u64 {
        self.endpoint.bar()
    }

    pub fn read_register(&self, chn: u32, index: u32) -> u32 {
        self.endpoint.regs().read32(register_offset(chn, index))
    }

    pub fn write_register(&self, chn: u32, index: u32, value: u32) {
        self.endpoint.regs().write32(register_offset(chn, index), value)
    }

    /// Point `this_id` at the peer's data register and switch it to peer mode.
    ///
    /// The transmitting side pushes its data straight into the peer.
    pub fn pair_tx(&self, pair: PairInfo) {
        self.pair(pair, ChannelRegister::Data);
    }

    /// Point `this_id` at the peer's size register and switch it to peer mode.
    ///
    /// The receiving side announces free space straight to the peer.
    pub fn pair_rx(&self, pair: PairInfo) {
        self.pair(pair, ChannelRegister::Size);
    }

    fn pair(&self, pair: PairInfo, target: ChannelRegister) {
        let addr = pair.other_bar.wrapping_add(target.offset(pair.other_id) as u64);
        let regs = self.endpoint.regs();
        // The address register is 32 bits; peers sit in the low window
        regs.write_channel(pair.this_id, ChannelRegister::AddrLo, addr as u32);
        regs.write_channel(pair.this_id, ChannelRegister::Mode, MODE_PEER);
        kdebug!(chn = pair.this_id; "Paired with channel {} at {:#x}", pair.other_id, addr);
    }
}

impl Drop for MmioPort {
    fn drop(&mut self) {
        self.endpoint.mmio_open.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DriverConfig;
    use vcl_core::regs::CHANNEL_INFO_REG;
    use vcl_core::RegisterAccess;
    use vcl_module::{IommuMapper, RegisterFile};

    fn endpoint(bar: u64) -> (Arc<Endpoint>, Arc<RegisterFile>) {
        let regs = Arc::new(RegisterFile::new(0x1000));
        regs.write32(CHANNEL_INFO_REG, 0);
        let ep = Endpoint::probe(regs.clone(), Arc::new(IommuMapper::new()), bar, &DriverConfig::new()).unwrap();
        (Arc::new(ep), regs)
    }

    #[test]
    fn test_single_opener() {
        let (ep, _) = endpoint(0x1000);
        let port = MmioPort::open(Arc::clone(&ep)).unwrap();
        assert_eq!(MmioPort::open(Arc::clone(&ep)).unwrap_err(), VclError::Busy);
        drop(port);
        assert!(MmioPort::open(ep).is_ok());
    }

    #[test]
    fn test_peek_poke() {
        let (ep, regs) = endpoint(0xD000_0000);
        let port = MmioPort::open(ep).unwrap();
        assert_eq!(port.bar(), 0xD000_0000);

        port.write_register(3, ChannelRegister::Mode.index(), 0xABCD);
        assert_eq!(regs.read_channel(3, ChannelRegister::Mode), 0xABCD);
        assert_eq!(port.read_register(3, ChannelRegister::Mode.index()), 0xABCD);
    }

    #[test]
    fn test_pairing() {
        let (ep, regs) = endpoint(0);
        let port = MmioPort::open(ep).unwrap();
        let peer_bar = 0xE000_0000;

        port.pair_tx(PairInfo { other_bar: peer_bar, other_id: 2, this_id: 1 });
        assert_eq!(regs.read_channel(1, ChannelRegister::AddrLo), 0xE000_00BC);
        assert_eq!(regs.read_channel(1, ChannelRegister::Mode), 1);

        port.pair_rx(PairInfo { other_bar: peer_bar, other_id: 3, this_id: 4 });
        assert_eq!(regs.read_channel(4, ChannelRegister::AddrLo), 0xE000_00C8);
        assert_eq!(regs.read_channel(4, ChannelRegister::Mode), 1);
    }
}
