//! `RegisterFile` - in-memory `RegisterAccess` implementation.
//!
//! A flat array of 32-bit words. Every write is counted per word and the
//! most recent ones are kept in a bounded log, so tests can check exactly
//! which descriptor registers were touched and in what order.
//!
//! Reads outside the window return all-ones, like a PCI read that nobody
//! answers. Writes outside the window are dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use vcl_core::constants::INVALID_READ;
use vcl_core::{RegisterAccess, SpinLock};

/// Writes kept in the log
const LOG_CAPACITY: usize = 4096;

/// One logged register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub offset: usize,
    pub value: u32,
}

pub struct RegisterFile {
    words: Vec<AtomicU32>,
    writes: Vec<AtomicU64>,
    log: SpinLock<VecDeque<RegisterWrite>>,
}

impl RegisterFile {
    /// Zero-filled window of `len` bytes (rounded down to whole words)
    pub fn new(len: usize) -> Self {
        let n = len / 4;
        Self {
            words: (0..n).map(|_| AtomicU32::new(0)).collect(),
            writes: (0..n).map(|_| AtomicU64::new(0)).collect(),
            log: SpinLock::new(VecDeque::with_capacity(64)),
        }
    }

    /// Window size in bytes
    pub fn len(&self) -> usize {
        self.words.len() * 4
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    fn word(&self, offset: usize) -> Option<usize> {
        if offset % 4 != 0 {
            return None;
        }
        let idx = offset / 4;
        (idx < self.words.len()).then_some(idx)
    }

    /// Store without counting or logging; the device side of the window
    pub fn set(&self, offset: usize, value: u32) {
        if let Some(idx) = self.word(offset) {
            self.words[idx].store(value, Ordering::Release);
        }
    }

    /// Number of host writes to `offset`
    pub fn writes_to(&self, offset: usize) -> usize {
        self.word(offset)
            .map_or(0, |idx| self.writes[idx].load(Ordering::Acquire) as usize)
    }

    /// Most recent host writes, oldest first
    pub fn write_log(&self) -> Vec<RegisterWrite> {
        self.log.lock().iter().copied().collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl RegisterAccess for RegisterFile {
    fn read32(&self, offset: usize) -> u32 {
        match self.word(offset) {
            Some(idx) => self.words[idx].load(Ordering::Acquire),
            None => INVALID_READ,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let Some(idx) = self.word(offset) else {
            return;
        };
        self.words[idx].store(value, Ordering::Release);
        self.writes[idx].fetch_add(1, Ordering::AcqRel);

        let mut log = self.log.lock();
        if log.len() == LOG_CAPACITY {
            log.pop_front();
        }
        log.push_back(RegisterWrite { offset, value });
    }
}

impl std::fmt::Debug for RegisterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterFile").field("len", &self.len()).finish()
    }
}
