//! Blocking byte-stream file over a channel
//!
//! `ChannelFile` is what a character-device open hands back. An RX channel
//! is write-only, a TX channel read-only, and each channel has at most one
//! open file.
//!
//! Both `read` and `write` wait with a bounded timeout for a queue change:
//! - timeout: `Err(TryAgain)`, queues untouched
//! - signal on the file's `InterruptHandle`: `Err(Restart)`
//!
//! `write` returns the bytes accepted into buffers, not bytes delivered.
//! `read` returns the bytes copied out of serviced buffers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vcl_core::{kdebug, kerror, Direction, Result, SignalToken, VclError};

use crate::channel::Channel;
use crate::queue::Queue;
use crate::wait::WaitOutcome;

/// Requested access, as in `O_RDONLY` / `O_WRONLY` / `O_RDWR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    #[inline]
    pub fn readable(&self) -> bool {
        matches!(self, AccessMode::ReadOnly | AccessMode::ReadWrite)
    }

    #[inline]
    pub fn writable(&self) -> bool {
        matches!(self, AccessMode::WriteOnly | AccessMode::ReadWrite)
    }

    /// Whether a channel of `direction` may be opened this way
    pub fn permits(&self, direction: Direction) -> bool {
        match direction {
            Direction::Rx => !self.readable(),
            Direction::Tx => !self.writable(),
        }
    }
}

/// Result of `poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

impl Readiness {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.readable || self.writable
    }
}

/// Delivers a signal to whoever is blocked in this file's read or write
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    signal: SignalToken,
    channel: Arc<Channel>,
}

impl InterruptHandle {
    /// Mark a signal pending and wake the channel's waiters.
    ///
    /// The current or next wait of the file returns `Err(Restart)`.
    pub fn raise(&self) {
        self.signal.raise();
        self.channel.waitq.wake_all();
    }
}

/// An open channel
#[derive(Debug)]
pub struct ChannelFile {
    channel: Arc<Channel>,
    mode: AccessMode,
    signal: SignalToken,
}

impl ChannelFile {
    /// Open `channel` with its own signal token.
    pub fn open(channel: Arc<Channel>, mode: AccessMode) -> Result<Self> {
        Self::open_with_signal(channel, mode, SignalToken::new())
    }

    /// Open `channel`; waits are interrupted when `signal` is raised.
    ///
    /// Fails with `Busy` if the channel is already open and with `BadMode`
    /// if `mode` does not fit the channel's direction.
    pub fn open_with_signal(channel: Arc<Channel>, mode: AccessMode, signal: SignalToken) -> Result<Self> {
        if !channel.try_claim() {
            kerror!(chn = channel.id(); "Called open on busy channel");
            return Err(VclError::Busy);
        }

        if !mode.permits(channel.direction()) {
            kerror!(chn = channel.id(); "Tried to open {} channel with mode {:?}", channel.direction(), mode);
            channel.release();
            return Err(VclError::BadMode {
                channel: channel.id(),
                direction: channel.direction(),
            });
        }

        kdebug!(chn = channel.id(); "Opened {:?}", mode);
        Ok(Self { channel, mode, signal })
    }

    #[inline]
    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    #[inline]
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Handle for interrupting this file's waits from another thread
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            signal: self.signal.clone(),
            channel: Arc::clone(&self.channel),
        }
    }

    fn wait_for(&self, timeout: Duration, mut cond: impl FnMut(&Channel) -> bool) -> Result<()> {
        let channel = &self.channel;
        match channel.waitq.wait_until(timeout, Some(&self.signal), || cond(channel)) {
            WaitOutcome::Ready => Ok(()),
            WaitOutcome::TimedOut => Err(VclError::TryAgain),
            WaitOutcome::Interrupted => Err(VclError::Restart),
        }
    }

    /// Copy `data` into idle buffers and submit them.
    ///
    /// Waits until a buffer is idle or serviced. Returns the bytes taken,
    /// which may be less than `data.len()` when the pool runs out.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        if !self.mode.writable() {
            return Err(VclError::NotOpenFor("write"));
        }
        if data.is_empty() {
            return Ok(0);
        }

        self.wait_for(self.channel.write_timeout, Channel::is_ready)?;

        // Serviced on an RX channel only means "free again"
        self.channel.queues.lock().recycle_serviced();

        let mut accepted = 0;
        while accepted < data.len() {
            let Some(mut buf) = self.channel.queues.lock().pop_front(Queue::Idle) else {
                break;
            };
            let n = buf.fill_from(&data[accepted..]);
            self.channel.submit(buf)?;
            accepted += n;
        }

        Ok(accepted)
    }

    /// Copy serviced bytes into `out`.
    ///
    /// On a channel with nothing active or serviced, idle buffers are first
    /// submitted for `out.len()` bytes so there is something to wait for.
    /// A partly read buffer stays at the front of `serviced`. Whatever the
    /// call could not satisfy is requested from the device before returning.
    ///
    /// The whole call waits at most `read_timeout`, even if the device keeps
    /// completing empty transfers.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        if !self.mode.readable() {
            return Err(VclError::NotOpenFor("read"));
        }
        if out.is_empty() {
            return Ok(0);
        }

        // One bound for the whole call, however many empty transfers come back
        let deadline = Instant::now() + self.channel.read_timeout;

        loop {
            let starved = {
                let q = self.channel.queues.lock();
                !q.has_any(Queue::Active) && !q.has_any(Queue::Serviced)
            };
            if starved {
                self.channel.request_idle_buffers(out.len())?;
            }

            let left = deadline.saturating_duration_since(Instant::now());
            self.wait_for(left, |ch| ch.count(Queue::Serviced) > 0)?;

            let copied = self.drain_serviced(out);

            if copied < out.len() {
                if let Err(e) = self.channel.request_idle_buffers(out.len() - copied) {
                    if copied == 0 {
                        return Err(e);
                    }
                    // Bytes already left their buffers; report them
                    kerror!(chn = self.channel.id(); "Re-arming after read failed: {}", e);
                }
            }

            // Only empty transfers were serviced; wait for real data
            if copied > 0 {
                return Ok(copied);
            }
            if Instant::now() >= deadline {
                return Err(VclError::TryAgain);
            }
        }
    }

    fn drain_serviced(&self, out: &mut [u8]) -> usize {
        let channel = &self.channel;
        let mut copied = 0;

        while copied < out.len() {
            let Some(mut buf) = channel.queues.lock().pop_front(Queue::Serviced) else {
                break;
            };

            if buf.size() == 0 {
                buf.reset();
                channel.queues.lock().push(Queue::Idle, buf);
                continue;
            }
            if buf.cursor() > buf.size() {
                channel.record_anomaly();
                kerror!(chn = channel.id();
                    "Buffer {} read cursor {} beyond size {}", buf.id(), buf.cursor(), buf.size());
                buf.reset();
                channel.queues.lock().push(Queue::Idle, buf);
                continue;
            }

            copied += buf.drain_into(&mut out[copied..]);

            if buf.is_drained() {
                buf.reset();
                channel.queues.lock().push(Queue::Idle, buf);
            } else {
                channel.queues.lock().push_front(Queue::Serviced, buf);
                break;
            }
        }

        copied
    }

    /// Current readiness without blocking
    pub fn poll(&self) -> Readiness {
        let ready = self.channel.is_ready();
        match self.channel.direction() {
            Direction::Rx => Readiness { readable: false, writable: ready },
            Direction::Tx => Readiness { readable: ready, writable: false },
        }
    }

    /// Block like `poll(2)` until ready or `timeout` elapses.
    ///
    /// A timeout is not an error; the returned readiness is then empty.
    pub fn wait_ready(&self, timeout: Duration) -> Result<Readiness> {
        match self.wait_for(timeout, Channel::is_ready) {
            Ok(()) => Ok(self.poll()),
            Err(VclError::TryAgain) => Ok(Readiness::default()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for ChannelFile {
    fn drop(&mut self) {
        // In-flight buffers keep going; close does not flush
        self.channel.release();
        kdebug!(chn = self.channel.id(); "Closed");
    }
}
