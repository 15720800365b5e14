//! Lock records and the lock backing store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::Result;

/// A build lock as held in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// `team/project/ref`
    pub name: String,
    pub expires_at: DateTime<Utc>,
}

impl LockRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// Key-value store holding lock records, addressed by lock name.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Name of this store backend.
    fn name(&self) -> &'static str;

    /// Conditionally write `record`.
    ///
    /// Succeeds only if no record exists under `record.name` or the existing one
    /// expired before `now`. Returns whether the record was written.
    async fn put_if_absent_or_expired(&self, record: &LockRecord, now: DateTime<Utc>)
    -> Result<bool>;

    /// Unconditionally delete the record for `name`. Absent keys are not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Fetch the record for `name`, expired or not.
    async fn get(&self, name: &str) -> Result<Option<LockRecord>>;
}

/// Process-local lock store.
///
/// Only excludes builds launched through this process.
#[derive(Debug, Default)]
pub struct MemoryLockStore {
    records: Mutex<HashMap<String, LockRecord>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put_if_absent_or_expired(
        &self,
        record: &LockRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records
            .get(&record.name)
            .is_some_and(|held| !held.is_expired(now))
        {
            return Ok(false);
        }
        records.insert(record.name.clone(), record.clone());
        Ok(true)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.records.lock().await.remove(name);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<LockRecord>> {
        Ok(self.records.lock().await.get(name).cloned())
    }
}
