//! Condvar-based wait queue
//!
//! Used on platforms without futex support.

use super::WaitPrimitive;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct CondvarWait {
    /// Guards the generation for the condvar handshake
    lock: Mutex<()>,
    condvar: Condvar,
    generation: AtomicU32,
    waiters: AtomicUsize,
}

impl CondvarWait {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
            generation: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
        }
    }
}

impl Default for CondvarWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitPrimitive for CondvarWait {
    #[inline]
    fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    fn sleep(&self, seen: u32, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if self.generation.load(Ordering::SeqCst) == seen {
            let _ = self
                .condvar
                .wait_timeout_while(guard, timeout, |_| self.generation.load(Ordering::SeqCst) == seen);
        }

        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake_all(&self) {
        {
            let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        self.condvar.notify_all();
    }

    fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}
