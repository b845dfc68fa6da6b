//! Channel wait queue
//!
//! Callers sleep here until a queue change might unblock them. Every wake
//! bumps a generation counter, so a waiter that checked its condition and
//! then went to sleep can never miss a wake that happened in between.
//!
//! The platform primitive is a futex word on Linux and a mutex + condvar
//! pair elsewhere.

use std::time::{Duration, Instant};

use vcl_core::SignalToken;

/// Platform sleep/wake primitive behind a `WaitQueue`
///
/// Waiters read `generation()` before checking their condition and pass
/// that value to `sleep()`. `wake_all()` advances the generation before
/// waking, so a stale `sleep()` returns immediately.
pub trait WaitPrimitive: Send + Sync {
    /// Current wake generation
    fn generation(&self) -> u32;

    /// Sleep while the generation still equals `seen`, at most `timeout`.
    ///
    /// May return early or spuriously; callers re-check their condition.
    fn sleep(&self, seen: u32, timeout: Duration);

    /// Advance the generation and wake every sleeper
    fn wake_all(&self);

    /// Number of sleeping waiters (hint, may be stale)
    fn waiter_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexWait as PlatformWait;
    } else {
        mod fallback;
        pub use fallback::CondvarWait as PlatformWait;
    }
}

/// How a bounded wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition holds
    Ready,
    /// Timeout elapsed and the condition still does not hold
    TimedOut,
    /// A signal was pending
    Interrupted,
}

/// Wait queue of one channel
pub struct WaitQueue {
    inner: PlatformWait,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self { inner: PlatformWait::new() }
    }

    /// Block until `cond` holds, `timeout` elapses, or `signal` is raised.
    ///
    /// The condition is evaluated before the first sleep and once more
    /// after the deadline, so a change that races with the timeout is still
    /// reported as `Ready`. A satisfied condition wins over a pending signal.
    pub fn wait_until<F>(&self, timeout: Duration, signal: Option<&SignalToken>, mut cond: F) -> WaitOutcome
    where
        F: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.inner.generation();
            if cond() {
                return WaitOutcome::Ready;
            }
            if signal.map_or(false, |s| s.take()) {
                return WaitOutcome::Interrupted;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitOutcome::TimedOut;
            }
            self.inner.sleep(seen, deadline - now);
        }
    }

    /// Wake every waiter so it re-checks its condition
    #[inline]
    pub fn wake_all(&self) {
        self.inner.wake_all();
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.waiter_count()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ready_without_sleeping() {
        let wq = WaitQueue::new();
        let start = Instant::now();
        let outcome = wq.wait_until(Duration::from_secs(5), None, || true);
        assert_eq!(outcome, WaitOutcome::Ready);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_timeout() {
        let wq = WaitQueue::new();
        let start = Instant::now();
        let outcome = wq.wait_until(Duration::from_millis(50), None, || false);
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wake_all_unblocks_waiter() {
        let wq = Arc::new(WaitQueue::new());
        let flag = Arc::new(AtomicBool::new(false));

        let handle = {
            let wq = Arc::clone(&wq);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                wq.wait_until(Duration::from_secs(10), None, || flag.load(Ordering::Acquire))
            })
        };

        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::Release);
        wq.wake_all();

        assert_eq!(handle.join().unwrap(), WaitOutcome::Ready);
    }

    #[test]
    fn test_signal_interrupts() {
        let wq = Arc::new(WaitQueue::new());
        let token = SignalToken::new();

        let handle = {
            let wq = Arc::clone(&wq);
            let token = token.clone();
            thread::spawn(move || wq.wait_until(Duration::from_secs(10), Some(&token), || false))
        };

        thread::sleep(Duration::from_millis(50));
        token.raise();
        wq.wake_all();

        assert_eq!(handle.join().unwrap(), WaitOutcome::Interrupted);
        // The wait consumed the signal
        assert!(!token.is_pending());
    }

    #[test]
    fn test_ready_wins_over_signal() {
        let wq = WaitQueue::new();
        let token = SignalToken::new();
        token.raise();
        assert_eq!(wq.wait_until(Duration::from_millis(10), Some(&token), || true), WaitOutcome::Ready);
        assert!(token.is_pending());
    }
}
