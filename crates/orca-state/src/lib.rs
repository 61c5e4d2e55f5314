//! orca-state: key/value store for the Orca orchestrator.
//!
//! Provides persistent and in-memory state for tasks and deployment
//! topologies, plus the lease-based locks that serialize lifecycle
//! operations on a deployment.
//!
//! # Architecture
//!
//! Values are UTF-8 strings; structured records are JSON-encoded. Keys are
//! `/`-separated paths (see [`keys`]) so a whole subtree (an instance, a
//! deployment) can be scanned or deleted by prefix.
//!
//! Storage sits behind the [`KvBackend`] trait. Read-modify-write
//! ([`StateStore::update`]) and lock acquisition are compare-and-swap loops
//! over it, so they stay correct on any backend that implements the trait
//! atomically.
//!
//! # Deployment
//!
//! The bundled [`RedbBackend`] is an embedded single-node database. One
//! `orcad` process owns a store file; its tasks share state and locks, but
//! two processes cannot share a file. Running several orchestrators against
//! one cluster needs a replicated backend passed to
//! [`StateStore::with_backend`]; none ships with this crate.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<dyn KvBackend>`) and can be shared across async tasks.

pub mod backend;
pub mod error;
pub mod keys;
pub mod lock;
pub mod store;
pub mod tables;
pub mod topology;
pub mod types;

pub use backend::{KvBackend, RedbBackend, Space};
pub use error::{StateError, StateResult};
pub use lock::{LockGuard, LockOptions, LockRecord, MAX_LOCK_DURATION};
pub use store::{KvOp, StateStore};
pub use types::*;
