//! In-memory checkout correlation store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::PendingCorrelation;
use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::CorrelationStore;

#[derive(Debug, Clone, Default)]
pub struct InMemoryCorrelationStore {
    entries: Arc<RwLock<HashMap<UserId, PendingCorrelation>>>,
}

impl InMemoryCorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CorrelationStore for InMemoryCorrelationStore {
    async fn put(&self, correlation: &PendingCorrelation) -> Result<(), DomainError> {
        self.entries
            .write()
            .await
            .insert(correlation.user_id.clone(), correlation.clone());
        Ok(())
    }

    async fn take(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<PendingCorrelation>, DomainError> {
        let taken = self.entries.write().await.remove(user_id);
        Ok(taken.filter(|c| c.is_live_at(now)))
    }

    async fn restore(&self, correlation: &PendingCorrelation) -> Result<bool, DomainError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&correlation.user_id) {
            return Ok(false);
        }
        entries.insert(correlation.user_id.clone(), correlation.clone());
        Ok(true)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, c| c.is_live_at(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    fn pending(user: &str, at: i64) -> PendingCorrelation {
        PendingCorrelation::new(UserId::new(user).unwrap(), None, ts(at), Duration::seconds(100))
    }

    #[tokio::test]
    async fn put_replaces_previous_entry() {
        let store = InMemoryCorrelationStore::new();
        let first = pending("u1", 0);
        let second = pending("u1", 10);
        store.put(&first).await.unwrap();
        store.put(&second).await.unwrap();

        let taken = store.take(&first.user_id, ts(20)).await.unwrap().unwrap();
        assert_eq!(taken.id, second.id);
    }

    #[tokio::test]
    async fn take_consumes_once() {
        let store = InMemoryCorrelationStore::new();
        let c = pending("u1", 0);
        store.put(&c).await.unwrap();

        assert!(store.take(&c.user_id, ts(1)).await.unwrap().is_some());
        assert!(store.take(&c.user_id, ts(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_entry_is_never_returned() {
        let store = InMemoryCorrelationStore::new();
        let c = pending("u1", 0);
        store.put(&c).await.unwrap();

        assert!(store.take(&c.user_id, ts(100)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn restore_does_not_clobber_newer_entry() {
        let store = InMemoryCorrelationStore::new();
        let old = pending("u1", 0);
        let newer = pending("u1", 5);
        store.put(&newer).await.unwrap();

        assert!(!store.restore(&old).await.unwrap());
        let taken = store.take(&old.user_id, ts(6)).await.unwrap().unwrap();
        assert_eq!(taken.id, newer.id);

        assert!(store.restore(&old).await.unwrap());
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        let store = InMemoryCorrelationStore::new();
        store.put(&pending("u1", 0)).await.unwrap();
        store.put(&pending("u2", 500)).await.unwrap();

        assert_eq!(store.purge_expired(ts(200)).await.unwrap(), 1);
    }
}
