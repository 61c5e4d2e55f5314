//! redb table definitions for the Orca state store.
//!
//! Both tables map `&str` keys to UTF-8 values. `KV` holds the orchestrator's
//! state; `LOCKS` holds JSON-serialized [`LockRecord`](crate::LockRecord)s.

use redb::TableDefinition;

use crate::backend::Space;

/// All task and topology state keyed by `/`-separated paths.
pub const KV: TableDefinition<&str, &str> = TableDefinition::new("kv");

/// Lease records keyed by lock path.
pub const LOCKS: TableDefinition<&str, &str> = TableDefinition::new("locks");

/// Table holding `space`.
pub(crate) fn table(space: Space) -> TableDefinition<'static, &'static str, &'static str> {
    match space {
        Space::Kv => KV,
        Space::Locks => LOCKS,
    }
}
