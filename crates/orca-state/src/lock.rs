//! Lease locks stored alongside the state they protect.
//!
//! A lock is a record in the locks keyspace of the store's backend. It is
//! free when absent or when its lease has expired, so a holder that crashes
//! blocks others for at most one `ttl`. Acquisition and release are
//! compare-and-swap operations, so holders sharing a backend exclude each
//! other. With the bundled redb backend that means the tasks of one `orcad`
//! process; a second process needs its own state directory.
//!
//! [`StateStore::acquire_lock`] hands back a [`LockGuard`]; dropping the guard
//! releases the lock, so a lock taken for a lifecycle operation is released
//! on every exit path of that operation.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use orca_core::{ConfigError, LockConfig};

use crate::backend::Space;
use crate::error::{StateError, StateResult, map_err};
use crate::store::StateStore;

/// Persisted lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique per acquisition; release only succeeds with the matching token.
    pub token: String,
    /// Free-form description of the holder, for diagnostics.
    pub holder: String,
    pub acquired_at_ms: u64,
    pub expires_at_ms: u64,
}

impl LockRecord {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms <= now_ms
    }
}

/// Timing parameters for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    pub wait_timeout: Duration,
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            wait_timeout: Duration::from_secs(10),
            retry_interval: Duration::from_millis(50),
        }
    }
}

/// Longest lease, wait or retry interval accepted from configuration.
pub const MAX_LOCK_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

impl TryFrom<&LockConfig> for LockOptions {
    type Error = ConfigError;

    fn try_from(config: &LockConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            ttl: bounded("locks.ttl", &config.ttl, config.ttl()?)?,
            wait_timeout: bounded(
                "locks.wait_timeout",
                &config.wait_timeout,
                config.wait_timeout()?,
            )?,
            retry_interval: bounded(
                "locks.retry_interval",
                &config.retry_interval,
                config.retry_interval()?,
            )?,
        })
    }
}

fn bounded(field: &str, raw: &str, value: Duration) -> Result<Duration, ConfigError> {
    if value > MAX_LOCK_DURATION {
        return Err(ConfigError::InvalidDuration {
            field: field.to_string(),
            value: raw.to_string(),
        });
    }
    Ok(value)
}

/// Held lock. Released by [`LockGuard::release`] or on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct LockGuard {
    store: StateStore,
    key: String,
    token: String,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock now, reporting store failures to the caller.
    pub fn release(mut self) -> StateResult<()> {
        self.released = true;
        self.store.release_lock(&self.key, &self.token).map(|_| ())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.release_lock(&self.key, &self.token) {
            // The lease still expires on its own.
            warn!(key = %self.key, error = %e, "failed to release lock");
        }
    }
}

impl StateStore {
    /// Single acquisition attempt. Returns `None` when another live lease holds
    /// the lock.
    pub fn try_acquire_lock(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
    ) -> StateResult<Option<LockGuard>> {
        let now = now_ms();
        let record = LockRecord {
            token: uuid::Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at_ms: now,
            expires_at_ms: now.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)),
        };
        let value = serde_json::to_string(&record).map_err(map_err!(Serialize))?;

        let current = self.backend.get(Space::Locks, key)?;
        if let Some(raw) = &current {
            let previous = parse_record(raw)?;
            if !previous.is_expired(now) {
                return Ok(None);
            }
            debug!(%key, previous = %previous.holder, "taking over expired lock");
        }
        if !self
            .backend
            .compare_and_swap(Space::Locks, key, current.as_deref(), Some(&value))?
        {
            // Another holder got there first.
            return Ok(None);
        }

        debug!(%key, %holder, "lock acquired");
        Ok(Some(LockGuard {
            store: self.clone(),
            key: key.to_string(),
            token: record.token,
            released: false,
        }))
    }

    /// Acquire `key`, waiting up to `options.wait_timeout`.
    ///
    /// Fails with [`StateError::LockTimeout`] (retryable) when the lock stays
    /// busy for the whole wait.
    pub async fn acquire_lock(
        &self,
        key: &str,
        holder: &str,
        options: &LockOptions,
    ) -> StateResult<LockGuard> {
        // No deadline when the wait does not fit in an `Instant`.
        let deadline = Instant::now().checked_add(options.wait_timeout);
        loop {
            if let Some(guard) = self.try_acquire_lock(key, holder, options.ttl)? {
                return Ok(guard);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(%key, %holder, "lock acquisition timed out");
                return Err(StateError::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(options.retry_interval).await;
        }
    }

    /// Current lease on `key`, expired or not.
    pub fn lock_record(&self, key: &str) -> StateResult<Option<LockRecord>> {
        self.backend
            .get(Space::Locks, key)?
            .map(|raw| parse_record(&raw))
            .transpose()
    }

    /// Remove the lease on `key` if it is still ours. Returns true if removed.
    fn release_lock(&self, key: &str, token: &str) -> StateResult<bool> {
        let removed = match self.backend.get(Space::Locks, key)? {
            Some(raw) if parse_record(&raw)?.token == token => {
                self.backend
                    .compare_and_swap(Space::Locks, key, Some(&raw), None)?
            }
            _ => false,
        };
        if removed {
            debug!(%key, "lock released");
        } else {
            debug!(%key, "lock already expired or taken over");
        }
        Ok(removed)
    }
}

fn parse_record(raw: &str) -> StateResult<LockRecord> {
    serde_json::from_str(raw).map_err(map_err!(Deserialize))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
