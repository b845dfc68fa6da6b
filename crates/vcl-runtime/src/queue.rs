//! Per-channel buffer queues
//!
//! Three FIFO queues hold the pool: `Idle` (free for the host), `Active`
//! (handed to the device; the head is the transaction it is executing) and
//! `Serviced` (finished by the device, waiting for the host). Buffers move
//! between them by value.
//!
//! `ChannelQueues` lives inside the channel's spin lock. Its counts are
//! mirrored into a shared `QueueCounts` on every push and pop, so
//! diagnostics can read approximate counts without taking the lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::Buffer;

/// Which of the three queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    Idle,
    Active,
    Serviced,
}

impl Queue {
    pub fn name(&self) -> &'static str {
        match self {
            Queue::Idle => "idle",
            Queue::Active => "active",
            Queue::Serviced => "serviced",
        }
    }
}

/// Lock-free mirror of the queue lengths
#[derive(Debug, Default)]
pub struct QueueCounts {
    idle: AtomicUsize,
    active: AtomicUsize,
    serviced: AtomicUsize,
}

impl QueueCounts {
    #[inline]
    fn slot(&self, queue: Queue) -> &AtomicUsize {
        match queue {
            Queue::Idle => &self.idle,
            Queue::Active => &self.active,
            Queue::Serviced => &self.serviced,
        }
    }

    /// Approximate length of `queue`
    #[inline]
    pub fn get(&self, queue: Queue) -> usize {
        self.slot(queue).load(Ordering::Relaxed)
    }

    /// Approximate `(idle, active, serviced)`
    pub fn snapshot(&self) -> (usize, usize, usize) {
        (self.get(Queue::Idle), self.get(Queue::Active), self.get(Queue::Serviced))
    }
}

/// The three queues of one channel. Not thread-safe by itself; the
/// channel keeps it behind its lock.
#[derive(Debug)]
pub struct ChannelQueues {
    idle: VecDeque<Buffer>,
    active: VecDeque<Buffer>,
    serviced: VecDeque<Buffer>,
    counts: Arc<QueueCounts>,
}

impl ChannelQueues {
    /// Empty queues sized for a pool of `pool_size` buffers
    pub fn new(pool_size: usize) -> Self {
        Self {
            idle: VecDeque::with_capacity(pool_size),
            active: VecDeque::with_capacity(pool_size),
            serviced: VecDeque::with_capacity(pool_size),
            counts: Arc::new(QueueCounts::default()),
        }
    }

    /// Shared handle to the count mirror
    pub fn counts(&self) -> Arc<QueueCounts> {
        Arc::clone(&self.counts)
    }

    #[inline]
    fn list(&self, queue: Queue) -> &VecDeque<Buffer> {
        match queue {
            Queue::Idle => &self.idle,
            Queue::Active => &self.active,
            Queue::Serviced => &self.serviced,
        }
    }

    #[inline]
    fn list_mut(&mut self, queue: Queue) -> &mut VecDeque<Buffer> {
        match queue {
            Queue::Idle => &mut self.idle,
            Queue::Active => &mut self.active,
            Queue::Serviced => &mut self.serviced,
        }
    }

    #[inline]
    fn publish(&self, queue: Queue) {
        self.counts.slot(queue).store(self.list(queue).len(), Ordering::Relaxed);
    }

    /// Append `buf` at the tail of `queue`
    #[inline]
    pub fn push(&mut self, queue: Queue, buf: Buffer) {
        self.list_mut(queue).push_back(buf);
        self.publish(queue);
    }

    /// Put `buf` back at the head of `queue`
    #[inline]
    pub fn push_front(&mut self, queue: Queue, buf: Buffer) {
        self.list_mut(queue).push_front(buf);
        self.publish(queue);
    }

    /// Remove the head of `queue`
    #[inline]
    pub fn pop_front(&mut self, queue: Queue) -> Option<Buffer> {
        let buf = self.list_mut(queue).pop_front();
        if buf.is_some() {
            self.publish(queue);
        }
        buf
    }

    #[inline]
    pub fn has_any(&self, queue: Queue) -> bool {
        !self.list(queue).is_empty()
    }

    #[inline]
    pub fn len(&self, queue: Queue) -> usize {
        self.list(queue).len()
    }

    #[inline]
    pub fn front(&self, queue: Queue) -> Option<&Buffer> {
        self.list(queue).front()
    }

    #[inline]
    pub fn front_mut(&mut self, queue: Queue) -> Option<&mut Buffer> {
        self.list_mut(queue).front_mut()
    }

    /// Buffers across all three queues
    pub fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.serviced.len()
    }

    /// Move every serviced buffer to idle, resetting each one.
    ///
    /// Returns the number moved.
    pub fn recycle_serviced(&mut self) -> usize {
        let mut moved = 0;
        while let Some(mut buf) = self.serviced.pop_front() {
            buf.reset();
            self.idle.push_back(buf);
            moved += 1;
        }
        if moved > 0 {
            self.publish(Queue::Serviced);
            self.publish(Queue::Idle);
        }
        moved
    }

    /// Buffer ids of `queue`, head first
    pub fn ids(&self, queue: Queue) -> Vec<u8> {
        self.list(queue).iter().map(Buffer::id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: u8) -> ChannelQueues {
        let mut q = ChannelQueues::new(n as usize);
        for id in 0..n {
            q.push(Queue::Idle, Buffer::new(id, 64).unwrap());
        }
        q
    }

    #[test]
    fn test_fifo_order() {
        let mut q = pool(3);
        assert_eq!(q.ids(Queue::Idle), vec![0, 1, 2]);
        let b0 = q.pop_front(Queue::Idle).unwrap();
        let b1 = q.pop_front(Queue::Idle).unwrap();
        q.push(Queue::Active, b0);
        q.push(Queue::Active, b1);
        assert_eq!(q.pop_front(Queue::Active).unwrap().id(), 0);
        assert_eq!(q.front(Queue::Active).unwrap().id(), 1);
    }

    #[test]
    fn test_push_front_takes_priority() {
        let mut q = pool(2);
        let b0 = q.pop_front(Queue::Idle).unwrap();
        let b1 = q.pop_front(Queue::Idle).unwrap();
        q.push(Queue::Serviced, b1);
        q.push_front(Queue::Serviced, b0);
        assert_eq!(q.ids(Queue::Serviced), vec![0, 1]);
    }

    #[test]
    fn test_counts_track_membership() {
        let mut q = pool(4);
        let counts = q.counts();
        assert_eq!(counts.snapshot(), (4, 0, 0));

        let b = q.pop_front(Queue::Idle).unwrap();
        q.push(Queue::Active, b);
        let b = q.pop_front(Queue::Idle).unwrap();
        q.push(Queue::Serviced, b);
        assert_eq!(counts.snapshot(), (2, 1, 1));
        assert_eq!(q.total(), 4);

        assert_eq!(q.recycle_serviced(), 1);
        assert_eq!(counts.snapshot(), (3, 1, 0));
        assert_eq!(q.total(), 4);
    }

    #[test]
    fn test_pop_empty() {
        let mut q = pool(0);
        assert!(q.pop_front(Queue::Active).is_none());
        assert!(!q.has_any(Queue::Active));
        assert_eq!(q.counts().get(Queue::Active), 0);
    }
}
