//! In-memory deferral queue.

use async_trait::async_trait;
use chrono::Utc;
use decap_core::deferral::DeferralStore;
use decap_core::{BuildEvent, Result};
use tokio::sync::Mutex;
use tracing::debug;

/// Deferred builds held in process memory, lost on restart.
///
/// Entries are unique by lock name and kept in the order they were first
/// deferred. Every operation takes the same mutex, and snapshots are copies.
#[derive(Debug, Default)]
pub struct InMemoryDeferralQueue {
    entries: Mutex<Vec<BuildEvent>>,
}

impl InMemoryDeferralQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl DeferralStore for InMemoryDeferralQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn defer(&self, mut event: BuildEvent) -> Result<()> {
        let lock_name = event.lock_name();
        let mut entries = self.entries.lock().await;

        if entries.iter().any(|e| e.lock_name() == lock_name) {
            debug!(lock_name = %lock_name, "Build already deferred");
            return Ok(());
        }

        event.deferred_at = Some(Utc::now());
        entries.push(event);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<BuildEvent>> {
        Ok(self.entries.lock().await.clone())
    }

    async fn poll(&self) -> Result<Vec<BuildEvent>> {
        Ok(std::mem::take(&mut *self.entries.lock().await))
    }

    async fn remove(&self, lock_name: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .retain(|e| e.lock_name() != lock_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn event(git_ref: &str) -> BuildEvent {
        BuildEvent::new("acme", "widgets", git_ref)
    }

    fn refs(events: &[BuildEvent]) -> Vec<&str> {
        events.iter().map(|e| e.git_ref.as_str()).collect()
    }

    #[tokio::test]
    async fn test_defer_dedups_by_lock_name() {
        let queue = InMemoryDeferralQueue::new();
        queue.defer(event("master")).await.unwrap();
        queue.defer(event("feature/a")).await.unwrap();
        // Not adjacent to the first, still a duplicate.
        queue.defer(event("master")).await.unwrap();

        let listed = queue.list().await.unwrap();
        assert_eq!(refs(&listed), vec!["master", "feature/a"]);
        assert!(listed.iter().all(|e| e.deferred_at.is_some()));
    }

    #[tokio::test]
    async fn test_first_deferral_wins() {
        let queue = InMemoryDeferralQueue::new();
        queue.defer(event("master")).await.unwrap();
        let first = queue.list().await.unwrap()[0].deferred_at;

        queue.defer(event("master")).await.unwrap();
        assert_eq!(queue.list().await.unwrap()[0].deferred_at, first);
    }

    #[tokio::test]
    async fn test_list_does_not_drain() {
        let queue = InMemoryDeferralQueue::new();
        queue.defer(event("master")).await.unwrap();

        assert_eq!(queue.list().await.unwrap().len(), 1);
        assert_eq!(queue.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_poll_drains_in_order() {
        let queue = InMemoryDeferralQueue::new();
        for r in ["c", "a", "b"] {
            queue.defer(event(r)).await.unwrap();
        }

        let polled = queue.poll().await.unwrap();
        assert_eq!(refs(&polled), vec!["c", "a", "b"]);
        assert!(queue.list().await.unwrap().is_empty());
        assert!(queue.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_redefer_after_poll_gets_fresh_timestamp() {
        let queue = InMemoryDeferralQueue::new();
        queue.defer(event("master")).await.unwrap();
        let polled = queue.poll().await.unwrap();
        let first = polled[0].deferred_at.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        queue.defer(polled[0].clone()).await.unwrap();
        let second = queue.list().await.unwrap()[0].deferred_at.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_remove() {
        let queue = InMemoryDeferralQueue::new();
        queue.defer(event("master")).await.unwrap();
        queue.defer(event("develop")).await.unwrap();

        queue.remove("acme/widgets/master").await.unwrap();
        assert_eq!(refs(&queue.list().await.unwrap()), vec!["develop"]);

        // Removing an unknown key is fine.
        queue.remove("acme/widgets/nope").await.unwrap();
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_defers_keep_one_entry_per_key() {
        let queue = Arc::new(InMemoryDeferralQueue::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let r = if i % 2 == 0 { "master" } else { "develop" };
                queue.defer(event(r)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len().await, 2);
    }
}
