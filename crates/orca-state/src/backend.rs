//! Storage backends behind [`StateStore`](crate::StateStore).
//!
//! A backend holds two keyspaces ([`Space`]) of string keys and values and
//! offers exactly the primitives the store and the lease locks are built on:
//! point reads, ordered prefix scans, atomic batches and compare-and-swap.
//!
//! [`RedbBackend`] is the only implementation shipped. It is a single-node
//! store: state and locks are shared by every task of one `orcad` process,
//! not across processes or hosts. A replicated backend plugs in through
//! [`StateStore::with_backend`](crate::StateStore::with_backend).

use std::path::Path;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use tracing::debug;

use crate::error::{StateResult, map_err};
use crate::store::KvOp;
use crate::tables;

/// Keyspace of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    /// Task and topology state.
    Kv,
    /// Lease locks.
    Locks,
}

/// Key/value storage used by [`StateStore`](crate::StateStore).
///
/// Every method is atomic with respect to every other call on the same
/// backend.
pub trait KvBackend: Send + Sync + std::fmt::Debug {
    /// Value stored at `key`.
    fn get(&self, space: Space, key: &str) -> StateResult<Option<String>>;

    /// All `(key, value)` pairs under `prefix`, in key order.
    fn scan(&self, space: Space, prefix: &str) -> StateResult<Vec<(String, String)>>;

    /// Apply `ops` all-or-nothing. Returns the number of keys removed.
    fn apply(&self, space: Space, ops: &[KvOp]) -> StateResult<u32>;

    /// Replace the value at `key` with `new` (`None` deletes) only when it
    /// currently equals `expected` (`None` meaning absent). Returns whether
    /// the swap happened.
    fn compare_and_swap(
        &self,
        space: Space,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> StateResult<bool>;
}

/// Embedded redb database, on disk or in memory.
pub struct RedbBackend {
    db: Database,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend").finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open (or create) the database file at `path`.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let backend = Self { db };
        backend.ensure_tables()?;
        debug!(?path, "redb backend opened");
        Ok(backend)
    }

    /// Ephemeral database for tests.
    pub fn in_memory() -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(map_err!(Open))?;
        let backend = Self { db };
        backend.ensure_tables()?;
        Ok(backend)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(tables::KV).map_err(map_err!(Table))?;
        txn.open_table(tables::LOCKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl KvBackend for RedbBackend {
    fn get(&self, space: Space, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(tables::table(space)).map_err(map_err!(Table))?;
        let value = table
            .get(key)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_string());
        Ok(value)
    }

    fn scan(&self, space: Space, prefix: &str) -> StateResult<Vec<(String, String)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(tables::table(space)).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(prefix) {
                break;
            }
            results.push((key.value().to_string(), value.value().to_string()));
        }
        Ok(results)
    }

    fn apply(&self, space: Space, ops: &[KvOp]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut removed = 0;
        {
            let mut table = txn.open_table(tables::table(space)).map_err(map_err!(Table))?;
            for op in ops {
                match op {
                    KvOp::Put { key, value } => {
                        table
                            .insert(key.as_str(), value.as_str())
                            .map_err(map_err!(Write))?;
                    }
                    KvOp::Delete { key } => {
                        if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                            removed += 1;
                        }
                    }
                    KvOp::DeleteTree { prefix } => {
                        removed += delete_prefix(&mut table, prefix)?;
                    }
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    fn compare_and_swap(
        &self,
        space: Space,
        key: &str,
        expected: Option<&str>,
        new: Option<&str>,
    ) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(tables::table(space)).map_err(map_err!(Table))?;
            let current = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_string());
            if current.as_deref() != expected {
                drop(table);
                txn.abort().map_err(map_err!(Transaction))?;
                return Ok(false);
            }
            match new {
                Some(value) => {
                    table.insert(key, value).map_err(map_err!(Write))?;
                }
                None => {
                    table.remove(key).map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(true)
    }
}

fn delete_prefix(table: &mut Table<'_, &'static str, &'static str>, prefix: &str) -> StateResult<u32> {
    // Collect first: the table cannot be mutated while a range borrows it.
    let mut keys = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        if !key.value().starts_with(prefix) {
            break;
        }
        keys.push(key.value().to_string());
    }
    for key in &keys {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    Ok(keys.len() as u32)
}
