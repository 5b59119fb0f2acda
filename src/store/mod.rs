//! Swap persistence: a host-supplied key/value capability and the
//! swap-aware store built on top of it.

mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

pub use sqlite::SqliteAdapter;

use crate::error::{Error, StoreError};
use crate::keys::WalletNamespace;
use crate::swap::SwapRecord;

/// Host-supplied storage capability. Keys are opaque byte-safe strings,
/// values opaque serialized records.
///
/// Implementations must tolerate concurrent calls targeting different keys;
/// no cross-key transaction is required.
pub trait PersistenceAdapter: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-memory adapter for tests and ephemeral embedders.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceAdapter for MemoryAdapter {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().expect("memory adapter mutex poisoned");
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("memory adapter mutex poisoned");
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("memory adapter mutex poisoned");
        entries.remove(key);
        Ok(())
    }
}

/// Both id lists live in a single store key so that moving a swap between
/// them is one `put`: after a crash a swap id is always in exactly one list.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SwapIndex {
    pending: Vec<String>,
    completed: Vec<String>,
}

impl SwapIndex {
    fn track(&mut self, swap_id: &str, terminal: bool) {
        self.pending.retain(|id| id != swap_id);
        self.completed.retain(|id| id != swap_id);
        if terminal {
            self.completed.push(swap_id.to_string());
        } else {
            self.pending.push(swap_id.to_string());
        }
    }

    fn forget(&mut self, swap_id: &str) -> bool {
        let before = self.pending.len() + self.completed.len();
        self.pending.retain(|id| id != swap_id);
        self.completed.retain(|id| id != swap_id);
        before != self.pending.len() + self.completed.len()
    }
}

/// Namespaced, indexed storage of [`SwapRecord`]s over a
/// [`PersistenceAdapter`].
#[derive(Clone)]
pub struct SwapStore {
    adapter: Arc<dyn PersistenceAdapter>,
    namespace: WalletNamespace,
}

impl SwapStore {
    pub fn new(adapter: Arc<dyn PersistenceAdapter>, namespace: WalletNamespace) -> Self {
        Self { adapter, namespace }
    }

    pub fn namespace(&self) -> &WalletNamespace {
        &self.namespace
    }

    fn swap_key(&self, swap_id: &str) -> String {
        format!("{}:swap:{swap_id}", self.namespace)
    }

    fn index_key(&self) -> String {
        format!("{}:index", self.namespace)
    }

    fn load_index(&self) -> Result<SwapIndex, Error> {
        let data = self
            .adapter
            .get(&self.index_key())
            .map_err(Error::Store)?;
        match data {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SwapIndex::default()),
        }
    }

    fn save_index(&self, index: &SwapIndex) -> Result<(), Error> {
        let bytes = serde_json::to_vec(index)?;
        self.adapter
            .put(&self.index_key(), &bytes)
            .map_err(Error::Store)
    }

    /// Write a record and keep the indices in step: pending while live,
    /// completed once terminal.
    pub fn put(&self, record: &SwapRecord) -> Result<(), Error> {
        let bytes = serde_json::to_vec(record)?;
        self.adapter
            .put(&self.swap_key(&record.swap_id), &bytes)
            .map_err(Error::Store)?;

        let mut index = self.load_index()?;
        index.track(&record.swap_id, record.phase.is_terminal());
        self.save_index(&index)?;

        tracing::debug!(swap_id = %record.swap_id, phase = %record.phase, "persisted swap record");
        Ok(())
    }

    pub fn get(&self, swap_id: &str) -> Result<Option<SwapRecord>, Error> {
        let data = self
            .adapter
            .get(&self.swap_key(swap_id))
            .map_err(Error::Store)?;
        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Raw serialized record, suitable for export and
    /// [`SwapOrchestrator::restore`](crate::swap::SwapOrchestrator::restore).
    pub fn raw(&self, swap_id: &str) -> Result<Option<String>, Error> {
        let data = self
            .adapter
            .get(&self.swap_key(swap_id))
            .map_err(Error::Store)?;
        Ok(data.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    pub fn pending_ids(&self) -> Result<Vec<String>, Error> {
        Ok(self.load_index()?.pending)
    }

    pub fn completed_ids(&self) -> Result<Vec<String>, Error> {
        Ok(self.load_index()?.completed)
    }

    /// Delete a record and drop it from both indices. Returns whether
    /// anything was removed.
    pub fn remove(&self, swap_id: &str) -> Result<bool, Error> {
        let existed = self
            .adapter
            .get(&self.swap_key(swap_id))
            .map_err(Error::Store)?
            .is_some();
        self.adapter
            .remove(&self.swap_key(swap_id))
            .map_err(Error::Store)?;

        let mut index = self.load_index()?;
        let indexed = index.forget(swap_id);
        if indexed {
            self.save_index(&index)?;
        }

        if existed || indexed {
            tracing::debug!(swap_id = %swap_id, "removed swap record");
        }
        Ok(existed || indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_adapter_roundtrip() {
        let adapter = MemoryAdapter::new();
        assert!(adapter.get("k").unwrap().is_none());

        adapter.put("k", b"v1").unwrap();
        assert_eq!(adapter.get("k").unwrap().as_deref(), Some(&b"v1"[..]));

        adapter.put("k", b"v2").unwrap();
        assert_eq!(adapter.get("k").unwrap().as_deref(), Some(&b"v2"[..]));

        adapter.remove("k").unwrap();
        assert!(adapter.get("k").unwrap().is_none());
        // removing a missing key is a no-op
        adapter.remove("k").unwrap();
    }

    #[test]
    fn index_track_and_forget_keep_exclusivity() {
        let mut index = SwapIndex::default();
        index.track("a", false);
        index.track("b", false);
        assert_eq!(index.pending, vec!["a", "b"]);

        index.track("a", true);
        assert_eq!(index.pending, vec!["b"]);
        assert_eq!(index.completed, vec!["a"]);

        // re-tracking a terminal swap is idempotent
        index.track("a", true);
        assert_eq!(index.completed, vec!["a"]);

        assert!(index.forget("a"));
        assert!(!index.forget("a"));
        assert!(index.completed.is_empty());
    }
}
