//! Deferral queue contract.
//!
//! A build is deferred when it loses the race for its lock. Deferred builds are
//! timestamped, deduplicated by lock name and relaunched later in the order they
//! were first deferred. A build leaves the queue the moment it is polled for
//! relaunch; if the relaunch is contended again it is deferred anew.

use async_trait::async_trait;

use crate::{BuildEvent, Result};

#[async_trait]
pub trait DeferralStore: Send + Sync {
    /// Name of this store backend.
    fn name(&self) -> &'static str;

    /// Queue `event`, stamping its `deferred_at`.
    ///
    /// A no-op if an entry with the same lock name is already queued.
    async fn defer(&self, event: BuildEvent) -> Result<()>;

    /// Snapshot of the queue in first-deferred order. Does not modify the queue.
    async fn list(&self) -> Result<Vec<BuildEvent>>;

    /// Snapshot of the queue in first-deferred order, emptying it atomically.
    async fn poll(&self) -> Result<Vec<BuildEvent>>;

    /// Drop any entry queued under `lock_name`.
    async fn remove(&self, lock_name: &str) -> Result<()>;
}
