//! Pending-signal token for interruptible waits
//!
//! A blocking read or write waits "interruptibly": a signal aimed at the
//! caller ends the wait early with `VclError::Restart` so the caller's
//! runtime can restart the call. In userspace the signal is modelled as a
//! token that another thread raises.
//!
//! Tokens can have a parent. A raised parent is sticky: every child sees
//! it until the parent is cleared, which models a process-wide signal such
//! as shutdown. A child's own signal is consumed by the wait it interrupts.

use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{Result, VclError};

/// Raised-signal flag shared between a waiter and whoever signals it
#[derive(Clone)]
pub struct SignalToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    pending: AtomicBool,
    parent: Option<SignalToken>,
}

impl SignalToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                pending: AtomicBool::new(false),
                parent: None,
            }),
        }
    }

    /// Create a token that also observes this one
    pub fn child(&self) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                pending: AtomicBool::new(false),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Mark a signal as pending. Does not wake anyone by itself.
    pub fn raise(&self) {
        self.inner.pending.store(true, Ordering::Release);
    }

    /// Whether this token or any ancestor has a pending signal
    #[inline]
    pub fn is_pending(&self) -> bool {
        if self.inner.pending.load(Ordering::Acquire) {
            return true;
        }
        match self.inner.parent {
            Some(ref parent) => parent.is_pending(),
            None => false,
        }
    }

    /// Consume this token's own signal; ancestors stay raised.
    ///
    /// Returns true if any signal was pending.
    #[inline]
    pub fn take(&self) -> bool {
        if self.inner.pending.swap(false, Ordering::AcqRel) {
            return true;
        }
        match self.inner.parent {
            Some(ref parent) => parent.is_pending(),
            None => false,
        }
    }

    /// `Err(Restart)` if a signal is pending, consuming it
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.take() {
            Err(VclError::Restart)
        } else {
            Ok(())
        }
    }

    /// Clear this token's own flag
    pub fn clear(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }
}

impl Default for SignalToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SignalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalToken")
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_take() {
        let token = SignalToken::new();
        assert!(!token.is_pending());
        assert!(token.check().is_ok());

        token.raise();
        assert!(token.is_pending());
        assert_eq!(token.check(), Err(VclError::Restart));

        // Consumed by the check above
        assert!(!token.is_pending());
    }

    #[test]
    fn test_parent_is_sticky() {
        let process = SignalToken::new();
        let a = process.child();
        let b = process.child();

        process.raise();
        assert!(a.take());
        assert!(b.take());
        // Still raised for everyone until the parent clears
        assert!(a.is_pending());

        process.clear();
        assert!(!a.is_pending());
        assert!(!b.is_pending());
    }

    #[test]
    fn test_child_does_not_affect_parent() {
        let parent = SignalToken::new();
        let child = parent.child();
        child.raise();
        assert!(child.is_pending());
        assert!(!parent.is_pending());
    }

    #[test]
    fn test_clone_shares_state() {
        let t1 = SignalToken::new();
        let t2 = t1.clone();
        t1.raise();
        assert!(t2.take());
        assert!(!t1.is_pending());
    }
}
