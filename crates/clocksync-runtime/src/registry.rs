//! Client registry
//!
//! Mapping from node identity to the handle used to reach it. Iteration is
//! in identity order so rounds and reports are deterministic.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use clocksync_core::{same_handle, NodeId, RemoteHandle};

#[derive(Default)]
pub struct ClientRegistry {
    entries: RwLock<BTreeMap<NodeId, RemoteHandle>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns true if an entry for `id` was replaced.
    pub fn register(&self, id: NodeId, handle: RemoteHandle) -> bool {
        self.entries.write().insert(id, handle).is_some()
    }

    /// Remove `id` if present
    pub fn remove(&self, id: &NodeId) -> Option<RemoteHandle> {
        self.entries.write().remove(id)
    }

    /// Remove `id` only while it still maps to `handle`.
    ///
    /// A node that re-registered while a round held the old handle keeps
    /// its new entry.
    pub fn evict(&self, id: &NodeId, handle: &RemoteHandle) -> bool {
        let mut entries = self.entries.write();
        match entries.get(id) {
            Some(current) if same_handle(current, handle) => {
                entries.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, id: &NodeId) -> Option<RemoteHandle> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.entries.read().contains_key(id)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.entries.read().keys().cloned().collect()
    }

    /// Point-in-time copy for a round to iterate without holding the lock
    pub fn snapshot(&self) -> Vec<(NodeId, RemoteHandle)> {
        self.entries
            .read()
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let n = entries.len();
        entries.clear();
        n
    }
}
