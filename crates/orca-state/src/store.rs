//! StateStore: key/value persistence for Orca.
//!
//! Provides string get/put/delete, prefix scans, subtree deletion, atomic
//! batches and read-modify-write over the state keyspace of a [`KvBackend`].
//! Structured records go through [`StateStore::put_json`] /
//! [`StateStore::get_json`]. [`StateStore::open`] and
//! [`StateStore::open_in_memory`] use the redb backend.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::backend::{KvBackend, RedbBackend, Space};
use crate::error::{StateError, StateResult, map_err};

/// One step of an atomic [`StateStore::apply`] batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvOp {
    Put { key: String, value: String },
    Delete { key: String },
    /// Remove every key starting with `prefix`.
    DeleteTree { prefix: String },
}

impl KvOp {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        KvOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Thread-safe state store over a shared [`KvBackend`].
#[derive(Clone)]
pub struct StateStore {
    pub(crate) backend: Arc<dyn KvBackend>,
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("backend", &self.backend)
            .finish()
    }
}

impl StateStore {
    /// Store over any backend.
    pub fn with_backend(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Open (or create) a persistent redb store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let backend = RedbBackend::open(path)?;
        debug!(?path, "state store opened");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = RedbBackend::in_memory()?;
        debug!("in-memory state store opened");
        Ok(Self::with_backend(Arc::new(backend)))
    }

    // ── Plain values ───────────────────────────────────────────────

    /// Get the value stored at `key`.
    pub fn get(&self, key: &str) -> StateResult<Option<String>> {
        self.backend.get(Space::Kv, key)
    }

    /// Insert or overwrite `key`.
    pub fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.apply(&[KvOp::put(key, value)])
    }

    /// Delete a single key. Returns true if it existed.
    pub fn delete(&self, key: &str) -> StateResult<bool> {
        let removed = self.backend.apply(
            Space::Kv,
            &[KvOp::Delete {
                key: key.to_string(),
            }],
        )?;
        Ok(removed > 0)
    }

    /// Delete every key under `prefix`. Returns the number of keys removed.
    pub fn delete_tree(&self, prefix: &str) -> StateResult<u32> {
        let count = self.backend.apply(
            Space::Kv,
            &[KvOp::DeleteTree {
                prefix: prefix.to_string(),
            }],
        )?;
        debug!(%prefix, count, "subtree deleted");
        Ok(count)
    }

    /// All `(key, value)` pairs under `prefix`, in key order.
    pub fn list(&self, prefix: &str) -> StateResult<Vec<(String, String)>> {
        self.backend.scan(Space::Kv, prefix)
    }

    /// All keys under `prefix`, in key order.
    pub fn list_keys(&self, prefix: &str) -> StateResult<Vec<String>> {
        Ok(self.list(prefix)?.into_iter().map(|(k, _)| k).collect())
    }

    // ── Transactions ───────────────────────────────────────────────

    /// Apply a batch of operations atomically.
    pub fn apply(&self, ops: &[KvOp]) -> StateResult<()> {
        self.backend.apply(Space::Kv, ops).map(|_| ())
    }

    /// Atomically read `key`, compute its next value with `f`, and store it.
    ///
    /// `f` is re-run on the fresh value whenever another writer changed `key`
    /// in between. Nothing is written when `f` fails. Returns the stored value.
    pub fn update<F, E>(&self, key: &str, mut f: F) -> Result<String, E>
    where
        F: FnMut(Option<&str>) -> Result<String, E>,
        E: From<StateError>,
    {
        loop {
            let current = self.get(key)?;
            let next = f(current.as_deref())?;
            if self
                .backend
                .compare_and_swap(Space::Kv, key, current.as_deref(), Some(&next))?
            {
                return Ok(next);
            }
            debug!(%key, "concurrent write, retrying update");
        }
    }

    // ── JSON records ───────────────────────────────────────────────

    /// Store a JSON-serialized record at `key`.
    pub fn put_json<T: Serialize>(&self, key: &str, record: &T) -> StateResult<()> {
        let value = serde_json::to_string(record).map_err(map_err!(Serialize))?;
        self.put(key, &value)
    }

    /// Load a JSON-serialized record from `key`.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> StateResult<Option<T>> {
        match self.get(key)? {
            Some(value) => {
                let record = serde_json::from_str(&value).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}
