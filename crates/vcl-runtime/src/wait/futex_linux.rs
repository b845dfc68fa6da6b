//! Linux futex-based wait queue
//!
//! The futex word is the wake generation itself:
//! - a waiter calls FUTEX_WAIT with the generation it observed, so the
//!   kernel refuses to sleep if a wake already advanced it
//! - a waker increments the word, then FUTEX_WAKEs everyone
//!
//! The waiter count lets `wake_all()` skip the syscall when nobody sleeps.
//! Both sides use SeqCst, so either the waker sees the waiter or the waiter
//! sees the new generation.

use super::WaitPrimitive;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub struct FutexWait {
    /// Futex word: wake generation
    generation: AtomicU32,

    /// Sleeping waiters
    waiters: AtomicUsize,
}

impl FutexWait {
    pub fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
        }
    }
}

impl Default for FutexWait {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitPrimitive for FutexWait {
    #[inline]
    fn generation(&self) -> u32 {
        self.generation.load(Ordering::SeqCst)
    }

    fn sleep(&self, seen: u32, timeout: Duration) {
        self.waiters.fetch_add(1, Ordering::SeqCst);

        let ts = libc::timespec {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_nsec: timeout.subsec_nanos() as libc::c_long,
        };

        // Returns 0 on wake; ETIMEDOUT, EAGAIN (generation moved) and EINTR
        // all send the caller back to re-check its condition.
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.generation.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                seen,
                &ts as *const libc::timespec,
                std::ptr::null::<u32>(),
                0u32,
            );
        }

        self.waiters.fetch_sub(1, Ordering::SeqCst);
    }

    fn wake_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);

        if self.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }

        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.generation.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn waiter_count(&self) -> usize {
        self.waiters.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_stale_generation_does_not_sleep() {
        let w = FutexWait::new();
        let seen = w.generation();
        w.wake_all();
        let start = Instant::now();
        w.sleep(seen, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(w.waiter_count(), 0);
    }
}
