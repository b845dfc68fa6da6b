//! Completion handler
//!
//! Runs once per device interrupt, in interrupt context: it never sleeps
//! and never fails. Everything it does happens under the queue lock:
//!
//! 1. retire the head of `active` (the transaction that just finished)
//! 2. unmap it and take the device's transferred-byte count as its size
//! 3. move it to `serviced`
//! 4. arm the new head of `active` if it was queued behind
//! 5. wake every waiter
//!
//! Anomalies (spurious interrupt, oversized count, failed promotion) are
//! logged and counted, never propagated.

use vcl_core::{kdebug, kwarn, ChannelRegister};

use crate::channel::Channel;
use crate::queue::Queue;

impl Channel {
    /// Retire the running transaction and advance the pipeline.
    pub fn handle_completion(&self) {
        {
            let mut queues = self.queues.lock();

            if !queues.front(Queue::Active).map_or(false, |b| b.in_flight) {
                self.record_anomaly();
                kwarn!(chn = self.id(); "Completion interrupt with no transaction in flight");
                return;
            }
            let Some(mut buf) = queues.pop_front(Queue::Active) else {
                return;
            };

            self.unmap_buffer(&mut buf);

            let transferred = self.regs.read_channel(self.id(), ChannelRegister::Transferred) as usize;
            if transferred > buf.size {
                self.record_anomaly();
                kwarn!(chn = self.id();
                    "Device reports {} bytes for a {} byte request on buffer {}",
                    transferred, buf.size, buf.id());
            }
            buf.size = transferred.min(buf.size);
            buf.cursor = 0;
            buf.in_flight = false;

            kdebug!(chn = self.id(); "Closed transaction on buffer {} ({} bytes)", buf.id(), buf.size);
            queues.push(Queue::Serviced, buf);

            self.promote_head(&mut queues);
        }

        self.waitq.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::test_support::*;
    use crate::queue::Queue;
    use vcl_core::{ChannelRegister, Direction, RegisterAccess};

    #[test]
    fn test_retire_moves_head_to_serviced() {
        let rig = rig(Direction::Tx, 2, 128);
        rig.channel.request_idle_buffers(100).unwrap();

        complete(&rig, 60);
        assert_eq!(rig.channel.queue_lengths(), (1, 0, 1));
        assert_eq!(rig.mapper.live_mappings(), 0);

        let q = rig.channel.queues.lock();
        let buf = q.front(Queue::Serviced).unwrap();
        assert_eq!(buf.size(), 60);
        assert_eq!(buf.cursor(), 0);
        assert!(!buf.is_in_flight());
        assert!(buf.device_address().is_none());
    }

    #[test]
    fn test_fifo_retirement_and_promotion() {
        let rig = rig(Direction::Tx, 3, 64);
        let ch = &rig.channel;
        ch.request_idle_buffers(64 * 3).unwrap();
        assert_eq!(ch.queue_ids(Queue::Active), vec![0, 1, 2]);

        complete(&rig, 64);
        // Next head was armed by the handler
        assert_eq!(ch.transaction_id(), 2);
        assert!(ch.queues.lock().front(Queue::Active).unwrap().is_in_flight());

        complete(&rig, 64);
        complete(&rig, 64);
        assert_eq!(ch.queue_ids(Queue::Serviced), vec![0, 1, 2]);
        assert_eq!(ch.transaction_id(), 3);
        assert_eq!(rig.regs.writes_to(ChannelRegister::Size.offset(1)), 3);
        assert_pool_intact(ch);
    }

    #[test]
    fn test_spurious_interrupt_tolerated() {
        let rig = rig(Direction::Tx, 2, 64);
        rig.channel.handle_completion();
        assert_eq!(rig.channel.anomalies(), 1);
        assert_eq!(rig.channel.queue_lengths(), (2, 0, 0));
    }

    #[test]
    fn test_oversized_count_clamped() {
        let rig = rig(Direction::Tx, 1, 64);
        rig.channel.request_idle_buffers(32).unwrap();
        complete(&rig, 4096);
        assert_eq!(rig.channel.anomalies(), 1);
        assert_eq!(rig.channel.queues.lock().front(Queue::Serviced).unwrap().size(), 32);
    }

    #[test]
    fn test_promotion_mapping_failure_stalls() {
        let rig = rig(Direction::Tx, 2, 64);
        let ch = &rig.channel;
        ch.request_idle_buffers(128).unwrap();

        rig.mapper.fail_next(1);
        complete(&rig, 64);

        // Retired buffer made it out; the queued one stays unarmed
        assert_eq!(ch.queue_lengths(), (0, 1, 1));
        assert!(!ch.queues.lock().front(Queue::Active).unwrap().is_in_flight());
        assert_eq!(ch.transaction_id(), 1);
        assert_eq!(ch.anomalies(), 1);

        // A further interrupt has nothing in flight to retire
        complete(&rig, 64);
        assert_eq!(ch.queue_lengths(), (0, 1, 1));
        assert_eq!(ch.anomalies(), 2);
        assert_pool_intact(ch);
    }

    #[test]
    fn test_handler_wakes_waiters() {
        use std::sync::Arc;
        use std::thread;
        use std::time::Duration;

        let rig = rig(Direction::Tx, 1, 64);
        rig.channel.request_idle_buffers(64).unwrap();

        let ch = Arc::clone(&rig.channel);
        let waiter = thread::spawn(move || {
            ch.waitq.wait_until(Duration::from_secs(10), None, || ch.count(Queue::Serviced) > 0)
        });

        thread::sleep(Duration::from_millis(20));
        rig.regs.write_channel(1, ChannelRegister::Transferred, 64);
        rig.channel.handle_completion();

        assert_eq!(waiter.join().unwrap(), crate::wait::WaitOutcome::Ready);
    }
}
