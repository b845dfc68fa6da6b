//! `NodeTable` - in-memory `ChannelRegistrar`.
//!
//! Records node names with their handles. Duplicate names are refused
//! with `EEXIST`; `fail_after()` makes registration run out of room after
//! a number of successes so bring-up rollback can be exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use vcl_core::{kdebug, ChannelRegistrar, DeviceNode, NodeHandle, Result, VclError};

pub struct NodeTable {
    nodes: Mutex<BTreeMap<String, (NodeHandle, DeviceNode)>>,
    next: AtomicU64,
    /// Registrations left before `ENOSPC`; `usize::MAX` means unlimited
    budget: AtomicUsize,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: Mutex::new(BTreeMap::new()),
            next: AtomicU64::new(1),
            budget: AtomicUsize::new(usize::MAX),
        }
    }

    /// Let `n` more registrations succeed, then fail with `ENOSPC`
    pub fn fail_after(&self, n: usize) {
        self.budget.store(n, Ordering::SeqCst);
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn lookup(&self, name: &str) -> Option<DeviceNode> {
        self.lock().get(name).map(|(_, node)| node.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, (NodeHandle, DeviceNode)>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_budget(&self) -> bool {
        self.budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |b| match b {
                usize::MAX => Some(b),
                0 => None,
                b => Some(b - 1),
            })
            .is_ok()
    }
}

impl Default for NodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistrar for NodeTable {
    fn register(&self, node: &DeviceNode) -> Result<NodeHandle> {
        let name = node.name();
        let mut nodes = self.lock();
        if nodes.contains_key(&name) {
            return Err(VclError::Registration(libc::EEXIST));
        }
        if !self.take_budget() {
            return Err(VclError::Registration(libc::ENOSPC));
        }
        let handle = NodeHandle(self.next.fetch_add(1, Ordering::Relaxed));
        kdebug!("Registered node {}", name);
        nodes.insert(name, (handle, node.clone()));
        Ok(handle)
    }

    fn unregister(&self, handle: NodeHandle) {
        let mut nodes = self.lock();
        nodes.retain(|name, (h, _)| {
            if *h == handle {
                kdebug!("Removed node {}", name);
                false
            } else {
                true
            }
        });
    }
}

impl std::fmt::Debug for NodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTable").field("nodes", &self.names()).finish()
    }
}
