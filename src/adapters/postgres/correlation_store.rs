//! PostgreSQL checkout correlation store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::db_error;
use crate::domain::billing::PendingCorrelation;
use crate::domain::foundation::{CorrelationId, DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::CorrelationStore;

pub struct PostgresCorrelationStore {
    pool: PgPool,
}

impl PostgresCorrelationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CorrelationRow {
    id: Uuid,
    user_id: String,
    price_id: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<CorrelationRow> for PendingCorrelation {
    type Error = DomainError;

    fn try_from(row: CorrelationRow) -> Result<Self, Self::Error> {
        Ok(PendingCorrelation {
            id: CorrelationId::from_uuid(row.id),
            user_id: UserId::new(row.user_id).map_err(|e| {
                DomainError::new(ErrorCode::DatabaseError, format!("Invalid user_id: {}", e))
            })?,
            price_id: row.price_id,
            created_at: Timestamp::from_datetime(row.created_at),
            expires_at: Timestamp::from_datetime(row.expires_at),
        })
    }
}

#[async_trait]
impl CorrelationStore for PostgresCorrelationStore {
    async fn put(&self, correlation: &PendingCorrelation) -> Result<(), DomainError> {
        sqlx::query(
            r#"
            INSERT INTO checkout_correlations (user_id, id, price_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                id = EXCLUDED.id,
                price_id = EXCLUDED.price_id,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(correlation.user_id.as_str())
        .bind(correlation.id.as_uuid())
        .bind(&correlation.price_id)
        .bind(correlation.created_at.as_datetime())
        .bind(correlation.expires_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to store checkout correlation", e))?;
        Ok(())
    }

    async fn take(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<PendingCorrelation>, DomainError> {
        // DELETE .. RETURNING hands the row to exactly one caller.
        let row: Option<CorrelationRow> = sqlx::query_as(
            r#"
            DELETE FROM checkout_correlations
            WHERE user_id = $1
            RETURNING id, user_id, price_id, created_at, expires_at
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to take checkout correlation", e))?;

        let correlation = row.map(PendingCorrelation::try_from).transpose()?;
        Ok(correlation.filter(|c| c.is_live_at(now)))
    }

    async fn restore(&self, correlation: &PendingCorrelation) -> Result<bool, DomainError> {
        let result = sqlx::query(
            r#"
            INSERT INTO checkout_correlations (user_id, id, price_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(correlation.user_id.as_str())
        .bind(correlation.id.as_uuid())
        .bind(&correlation.price_id)
        .bind(correlation.created_at.as_datetime())
        .bind(correlation.expires_at.as_datetime())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to restore checkout correlation", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM checkout_correlations WHERE expires_at <= $1")
            .bind(now.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to purge checkout correlations", e))?;
        Ok(result.rows_affected())
    }
}
