//! PostgreSQL idempotency ledger.
//!
//! The primary key on `event_id` decides concurrent claims:
//! `ON CONFLICT DO NOTHING` inserts for exactly one caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::db_error;
use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{AppliedEvent, IdempotencyLedger, LedgerOutcome};

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    event_id: String,
    event_type: String,
    applied_at: DateTime<Utc>,
}

impl From<LedgerRow> for AppliedEvent {
    fn from(row: LedgerRow) -> Self {
        AppliedEvent::new(row.event_id, row.event_type, Timestamp::from_datetime(row.applied_at))
    }
}

#[async_trait]
impl IdempotencyLedger for PostgresLedger {
    async fn check_and_record(&self, entry: &AppliedEvent) -> Result<LedgerOutcome, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_ledger (event_id, event_type, applied_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&entry.event_id)
        .bind(&entry.event_type)
        .bind(entry.applied_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to record webhook event", e))?;

        Ok(if result.rows_affected() == 1 {
            LedgerOutcome::Fresh
        } else {
            LedgerOutcome::AlreadyApplied
        })
    }

    async fn release(&self, event_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_ledger WHERE event_id = $1")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to release webhook event", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, event_id: &str) -> Result<Option<AppliedEvent>, DomainError> {
        let row: Option<LedgerRow> = sqlx::query_as(
            "SELECT event_id, event_type, applied_at FROM webhook_ledger WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find webhook event", e))?;
        Ok(row.map(AppliedEvent::from))
    }

    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM webhook_ledger WHERE applied_at < $1")
            .bind(cutoff.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to prune webhook ledger", e))?;
        Ok(result.rows_affected())
    }
}
