//! Submission protocol
//!
//! The device takes one outstanding descriptor per channel. The head of
//! `active` is always that descriptor's buffer; anything behind it is
//! queued unmapped until the completion handler promotes it.
//!
//! Programming a descriptor writes address-low, address-high (only when
//! non-zero) and size, in that order. The size write starts the transfer.

use std::sync::atomic::Ordering;

use vcl_core::{kdebug, kerror, ChannelRegister, DmaAddr, Result};

use crate::buffer::Buffer;
use crate::channel::Channel;
use crate::queue::{ChannelQueues, Queue};

impl Channel {
    /// Map `buf` for device access and remember its bus address.
    pub(crate) fn map_buffer(&self, buf: &mut Buffer) -> Result<DmaAddr> {
        let addr = self.mapper.map(buf.region(), self.direction()).map_err(|e| {
            kerror!(chn = self.id(); "Failed to map buffer {} for device access: {}", buf.id(), e);
            e
        })?;
        buf.device_address = Some(addr);
        Ok(addr)
    }

    /// Tear down the mapping of `buf`, if any.
    pub(crate) fn unmap_buffer(&self, buf: &mut Buffer) {
        if let Some(addr) = buf.device_address.take() {
            self.mapper.unmap(addr, buf.capacity(), self.direction());
        }
    }

    /// Write the descriptor of `buf` and mark it in flight.
    ///
    /// Caller holds the queue lock and `buf` is (or is about to become)
    /// the head of `active`.
    pub(crate) fn program_descriptor(&self, buf: &mut Buffer, addr: DmaAddr) {
        let id = self.id();
        self.regs.write_channel(id, ChannelRegister::AddrLo, addr.lo());
        if addr.hi() != 0 {
            self.regs.write_channel(id, ChannelRegister::AddrHi, addr.hi());
        }
        self.regs.write_channel(id, ChannelRegister::Size, buf.size as u32);
        buf.in_flight = true;

        let txn = self.transaction_id.fetch_add(1, Ordering::Relaxed) + 1;
        kdebug!(chn = id; "Opened transaction {} on buffer {} ({} bytes)", txn, buf.id(), buf.size);
    }

    /// Hand `buf` to the device, or queue it behind the running transaction.
    ///
    /// `buf.size` must already hold the requested transfer length. On a
    /// mapping failure the buffer goes back to `idle` and `Err(Fault)` is
    /// returned.
    pub(crate) fn submit(&self, mut buf: Buffer) -> Result<()> {
        buf.cursor = 0;
        buf.in_flight = false;

        {
            let mut queues = self.queues.lock();
            if queues.has_any(Queue::Active) {
                kdebug!(chn = self.id(); "Queued buffer {} behind running transaction", buf.id());
                queues.push(Queue::Active, buf);
                return Ok(());
            }
        }

        // Map without the lock; mappers may be slow on this path
        let addr = match self.map_buffer(&mut buf) {
            Ok(addr) => addr,
            Err(e) => {
                buf.reset();
                self.queues.lock().push(Queue::Idle, buf);
                self.waitq.wake_all();
                return Err(e);
            }
        };

        let mut queues = self.queues.lock();
        // Only the single opener pushes to `active` and the handler only
        // pops, so it is still empty after the unlocked map.
        debug_assert!(!queues.has_any(Queue::Active));
        self.program_descriptor(&mut buf, addr);
        queues.push(Queue::Active, buf);
        Ok(())
    }

    /// Submit idle buffers until `len` bytes are requested from the device
    /// or `idle` runs dry. Each buffer asks for at most its capacity.
    ///
    /// Returns the number of buffers submitted.
    pub(crate) fn request_idle_buffers(&self, len: usize) -> Result<usize> {
        let mut remaining = len;
        let mut submitted = 0;

        while remaining > 0 {
            let Some(mut buf) = self.queues.lock().pop_front(Queue::Idle) else {
                break;
            };
            let chunk = remaining.min(buf.capacity());
            buf.size = chunk;
            self.submit(buf)?;
            remaining -= chunk;
            submitted += 1;
        }

        Ok(submitted)
    }

    /// Arm the head of `active` if it is queued but not yet running.
    ///
    /// Runs under the queue lock from the completion handler. A mapping
    /// failure leaves the head in place unarmed and the channel stalls.
    pub(crate) fn promote_head(&self, queues: &mut ChannelQueues) {
        let Some(head) = queues.front_mut(Queue::Active) else {
            return;
        };
        if head.in_flight {
            return;
        }

        match self.map_buffer(head) {
            Ok(addr) => self.program_descriptor(head, addr),
            Err(_) => {
                self.record_anomaly();
                kerror!(chn = self.id(); "Channel stalled on buffer {}", head.id());
            }
        }
    }
}
