//! Redis-backed idempotency ledger for multi-instance deployments.
//!
//! Each applied event is a key `billing:ledger:{event_id}` written with
//! `SET NX EX`. NX makes the claim atomic; EX lets Redis do the retention
//! pruning.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{AppliedEvent, IdempotencyLedger, LedgerOutcome};

const KEY_PREFIX: &str = "billing:ledger:";

#[derive(Clone)]
pub struct RedisLedger {
    conn: MultiplexedConnection,
    retention_secs: u64,
}

impl RedisLedger {
    pub fn new(conn: MultiplexedConnection, retention_secs: u64) -> Self {
        Self {
            conn,
            retention_secs: retention_secs.max(1),
        }
    }

    fn key(event_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, event_id)
    }
}

fn cache_error(context: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::cache(format!("{}: {}", context, err))
}

#[async_trait]
impl IdempotencyLedger for RedisLedger {
    async fn check_and_record(&self, entry: &AppliedEvent) -> Result<LedgerOutcome, DomainError> {
        let value = serde_json::to_string(entry).map_err(|e| cache_error("Failed to encode ledger entry", e))?;
        let mut conn = self.conn.clone();

        let reply: Option<String> = redis::cmd("SET")
            .arg(Self::key(&entry.event_id))
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(self.retention_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| cache_error("Failed to record webhook event", e))?;

        Ok(match reply {
            Some(_) => LedgerOutcome::Fresh,
            None => LedgerOutcome::AlreadyApplied,
        })
    }

    async fn release(&self, event_id: &str) -> Result<bool, DomainError> {
        let mut conn = self.conn.clone();
        let removed: u64 = conn
            .del(Self::key(event_id))
            .await
            .map_err(|e| cache_error("Failed to release webhook event", e))?;
        Ok(removed > 0)
    }

    async fn find(&self, event_id: &str) -> Result<Option<AppliedEvent>, DomainError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(Self::key(event_id))
            .await
            .map_err(|e| cache_error("Failed to read webhook event", e))?;

        raw.map(|json| serde_json::from_str(&json).map_err(|e| cache_error("Corrupt ledger entry", e)))
            .transpose()
    }

    /// Keys expire on their own.
    async fn prune_before(&self, _cutoff: Timestamp) -> Result<u64, DomainError> {
        Ok(0)
    }
}

impl std::fmt::Debug for RedisLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLedger")
            .field("retention_secs", &self.retention_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(RedisLedger::key("evt_1"), "billing:ledger:evt_1");
    }

    #[test]
    fn entries_survive_encoding() {
        let entry = AppliedEvent::new("evt_1", "invoice.paid", Timestamp::from_unix_secs(10).unwrap());
        let json = serde_json::to_string(&entry).unwrap();
        let back: AppliedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }

    // Needs a running Redis: REDIS_URL=redis://127.0.0.1/ cargo test -- --ignored
    #[tokio::test]
    #[ignore]
    async fn second_claim_is_a_duplicate() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".into());
        let client = redis::Client::open(url).unwrap();
        let conn = client.get_multiplexed_tokio_connection().await.unwrap();
        let ledger = RedisLedger::new(conn, 60);
        let entry = AppliedEvent::new(
            format!("evt_{}", uuid::Uuid::new_v4()),
            "invoice.paid",
            Timestamp::now(),
        );

        assert_eq!(ledger.check_and_record(&entry).await.unwrap(), LedgerOutcome::Fresh);
        assert_eq!(ledger.check_and_record(&entry).await.unwrap(), LedgerOutcome::AlreadyApplied);
        assert!(ledger.release(&entry.event_id).await.unwrap());
    }
}
