//! In-memory idempotency ledger for tests and single-process deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{AppliedEvent, IdempotencyLedger, LedgerOutcome};

#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    entries: Arc<RwLock<HashMap<String, AppliedEvent>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn check_and_record(&self, entry: &AppliedEvent) -> Result<LedgerOutcome, DomainError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.event_id) {
            return Ok(LedgerOutcome::AlreadyApplied);
        }
        entries.insert(entry.event_id.clone(), entry.clone());
        Ok(LedgerOutcome::Fresh)
    }

    async fn release(&self, event_id: &str) -> Result<bool, DomainError> {
        Ok(self.entries.write().await.remove(event_id).is_some())
    }

    async fn find(&self, event_id: &str) -> Result<Option<AppliedEvent>, DomainError> {
        Ok(self.entries.read().await.get(event_id).cloned())
    }

    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.applied_at >= cutoff);
        Ok((before - entries.len()) as u64)
    }
}
