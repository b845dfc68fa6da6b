//! Interrupt dispatcher
//!
//! `IrqDispatcher` is the `InterruptSink` a device raises completions on.
//! Raises go into a bounded lock-free queue; one dispatcher thread drains
//! it and runs `Endpoint::handle_irq` for each vector. With a single
//! dispatcher, handlers for the same channel never overlap.
//!
//! The sink exists before the endpoint it serves: devices need it at
//! construction, the endpoint is probed afterwards. Raises that arrive
//! before `start()` wait in the queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::ArrayQueue;
use vcl_core::{kdebug, kwarn, InterruptSink, Result, VclError};

use crate::endpoint::Endpoint;

/// Idle poll interval of the dispatcher thread
const IDLE_PARK: Duration = Duration::from_millis(1);

struct DispatchInner {
    queue: ArrayQueue<u32>,
    shutdown: AtomicBool,
    delivered: AtomicU64,
    dropped: AtomicU64,
    /// Dispatcher thread, once started
    thread: OnceLock<Thread>,
}

pub struct IrqDispatcher {
    inner: Arc<DispatchInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl IrqDispatcher {
    /// Create a dispatcher holding up to `depth` pending interrupts
    pub fn new(depth: usize) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                queue: ArrayQueue::new(depth.max(1)),
                shutdown: AtomicBool::new(false),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                thread: OnceLock::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start delivering to `endpoint`. Fails with `Busy` if already started.
    pub fn start(&self, endpoint: Arc<Endpoint>) -> Result<()> {
        let mut slot = self.handle.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return Err(VclError::Busy);
        }

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("vcl-irq-{}", endpoint.id()))
            .spawn(move || dispatch_loop(inner, endpoint))
            .map_err(|e| VclError::Os(e.raw_os_error().unwrap_or(libc::EAGAIN)))?;

        let _ = self.inner.thread.set(handle.thread().clone());
        *slot = Some(handle);
        Ok(())
    }

    /// Stop the dispatcher thread after it drains what is queued.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(t) = self.inner.thread.get() {
            t.unpark();
        }
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    /// Interrupts handed to the endpoint so far
    pub fn delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Interrupts lost to a full queue
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Interrupts waiting for the dispatcher
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

impl InterruptSink for IrqDispatcher {
    fn raise(&self, vector: u32) {
        if self.inner.queue.push(vector).is_err() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
            kwarn!("Interrupt queue full, dropped vector {}", vector);
            return;
        }
        if let Some(t) = self.inner.thread.get() {
            t.unpark();
        }
    }
}

impl Drop for IrqDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch_loop(inner: Arc<DispatchInner>, endpoint: Arc<Endpoint>) {
    kdebug!("Interrupt dispatcher for endpoint {} running", endpoint.id());
    loop {
        match inner.queue.pop() {
            Some(vector) => {
                endpoint.handle_irq(vector);
                inner.delivered.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                thread::park_timeout(IDLE_PARK);
            }
        }
    }
    kdebug!("Interrupt dispatcher for endpoint {} stopped", endpoint.id());
}
