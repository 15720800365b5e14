//! Distributed build locks.
//!
//! One lock per `team/project/ref`, held in a shared [`LockStore`]. Locks expire
//! after a TTL so that a build pod that dies without releasing its lock only
//! blocks its branch for a bounded time.

use chrono::Utc;
use decap_core::lock::{LockRecord, LockStore};
use decap_core::{BuildEvent, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default lock TTL (3 hours).
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// Cross-process mutual exclusion keyed by lock name.
///
/// Acquisition is a single conditional write and is never retried here: a lost
/// race means another build holds the branch, and the caller defers.
#[derive(Clone)]
pub struct DistributedLockService {
    store: Arc<dyn LockStore>,
    ttl: chrono::Duration,
}

impl DistributedLockService {
    pub fn new(store: Arc<dyn LockStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(3)),
        }
    }

    /// Take the lock for `event`, failing with [`Error::LockHeld`] if another
    /// unexpired lock exists.
    pub async fn acquire(&self, event: &BuildEvent) -> Result<LockRecord> {
        let now = Utc::now();
        let record = LockRecord {
            name: event.lock_name(),
            expires_at: now + self.ttl,
        };

        if self.store.put_if_absent_or_expired(&record, now).await? {
            debug!(lock_name = %record.name, expires_at = %record.expires_at, "Acquired lock");
            Ok(record)
        } else {
            Err(Error::LockHeld(record.name))
        }
    }

    /// Drop the lock for `event`. Releasing a lock nobody holds is not an error.
    pub async fn release(&self, event: &BuildEvent) -> Result<()> {
        let name = event.lock_name();
        self.store.delete(&name).await?;
        debug!(lock_name = %name, "Released lock");
        Ok(())
    }

    /// Current record under `lock_name`, expired or not.
    pub async fn current(&self, lock_name: &str) -> Result<Option<LockRecord>> {
        self.store.get(lock_name).await
    }
}
