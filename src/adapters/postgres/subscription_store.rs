//! PostgreSQL implementation of SubscriptionStore.
//!
//! One row per account in `billing_accounts`, one row per provider
//! subscription in `billing_subscriptions`. The account row's `version`
//! column is the optimistic concurrency token for the whole aggregate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::db_error;
use crate::domain::billing::{EventMarker, PlanId, Subscription, SubscriptionStatus, UserAccount};
use crate::domain::foundation::{DomainError, ErrorCode, Timestamp, UserId};
use crate::ports::{SaveOutcome, SubscriptionStore, UsageOutcome};

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn load(&self, user_id: &str) -> Result<Option<UserAccount>, DomainError> {
        let account: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT user_id, provider_customer_id, version, created_at, updated_at
            FROM billing_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load billing account", e))?;

        let Some(account) = account else {
            return Ok(None);
        };

        let subscriptions: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT provider_subscription_id, is_current, plan_id, status,
                   current_period_start, current_period_end, quota_used,
                   status_marker_at, status_marker_event_id,
                   plan_marker_at, plan_marker_event_id,
                   created_at, canceled_at
            FROM billing_subscriptions
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load subscriptions", e))?;

        assemble(account, subscriptions).map(Some)
    }
}

/// Database row representation of an account.
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    user_id: String,
    provider_customer_id: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    provider_subscription_id: String,
    is_current: bool,
    plan_id: String,
    status: String,
    current_period_start: Option<DateTime<Utc>>,
    current_period_end: Option<DateTime<Utc>>,
    quota_used: i64,
    status_marker_at: Option<DateTime<Utc>>,
    status_marker_event_id: Option<String>,
    plan_marker_at: Option<DateTime<Utc>>,
    plan_marker_event_id: Option<String>,
    created_at: DateTime<Utc>,
    canceled_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let status = SubscriptionStatus::parse(&row.status).ok_or_else(|| {
            DomainError::new(
                ErrorCode::DatabaseError,
                format!("Invalid status value: {}", row.status),
            )
        })?;
        let plan_id = PlanId::new(row.plan_id).map_err(|e| {
            DomainError::new(ErrorCode::DatabaseError, format!("Invalid plan_id: {}", e))
        })?;

        Ok(Subscription {
            provider_subscription_id: row.provider_subscription_id,
            plan_id,
            status,
            current_period_start: row.current_period_start.map(Timestamp::from_datetime),
            current_period_end: row.current_period_end.map(Timestamp::from_datetime),
            quota_used: from_db_count(row.quota_used, "quota_used")?,
            status_marker: marker(row.status_marker_at, row.status_marker_event_id),
            plan_marker: marker(row.plan_marker_at, row.plan_marker_event_id),
            created_at: Timestamp::from_datetime(row.created_at),
            canceled_at: row.canceled_at.map(Timestamp::from_datetime),
        })
    }
}

fn assemble(account: AccountRow, rows: Vec<SubscriptionRow>) -> Result<UserAccount, DomainError> {
    let user_id = UserId::new(account.user_id).map_err(|e| {
        DomainError::new(ErrorCode::DatabaseError, format!("Invalid user_id: {}", e))
    })?;

    let mut current = None;
    let mut retired = Vec::new();
    for row in rows {
        let is_current = row.is_current;
        let sub = Subscription::try_from(row)?;
        if is_current {
            current = Some(sub);
        } else {
            retired.push(sub);
        }
    }

    Ok(UserAccount {
        user_id,
        provider_customer_id: account.provider_customer_id,
        subscription: current,
        retired_subscriptions: retired,
        version: from_db_count(account.version, "version")?,
        created_at: Timestamp::from_datetime(account.created_at),
        updated_at: Timestamp::from_datetime(account.updated_at),
    })
}

fn marker(at: Option<DateTime<Utc>>, event_id: Option<String>) -> Option<EventMarker> {
    match (at, event_id) {
        (Some(at), Some(event_id)) => Some(EventMarker::new(Timestamp::from_datetime(at), event_id)),
        _ => None,
    }
}

fn from_db_count(value: i64, field: &str) -> Result<u64, DomainError> {
    u64::try_from(value).map_err(|_| {
        DomainError::new(ErrorCode::DatabaseError, format!("Negative {}: {}", field, value))
    })
}

fn to_db_count(value: u64, field: &str) -> Result<i64, DomainError> {
    i64::try_from(value).map_err(|_| {
        DomainError::new(ErrorCode::OutOfRange, format!("{} too large: {}", field, value))
    })
}

/// Writes the account row if it is still at `account.version`.
///
/// Returns false when another writer got there first.
async fn write_account(
    tx: &mut Transaction<'_, Postgres>,
    account: &UserAccount,
) -> Result<bool, DomainError> {
    let next_version = to_db_count(account.version + 1, "version")?;

    let result = if account.is_persisted() {
        sqlx::query(
            r#"
            UPDATE billing_accounts SET
                provider_customer_id = $2,
                version = $3,
                updated_at = $4
            WHERE user_id = $1 AND version = $5
            "#,
        )
        .bind(account.user_id.as_str())
        .bind(&account.provider_customer_id)
        .bind(next_version)
        .bind(account.updated_at.as_datetime())
        .bind(to_db_count(account.version, "version")?)
        .execute(&mut **tx)
        .await
    } else {
        sqlx::query(
            r#"
            INSERT INTO billing_accounts (user_id, provider_customer_id, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(account.user_id.as_str())
        .bind(&account.provider_customer_id)
        .bind(next_version)
        .bind(account.created_at.as_datetime())
        .bind(account.updated_at.as_datetime())
        .execute(&mut **tx)
        .await
    }
    .map_err(|e| db_error("Failed to write billing account", e))?;

    Ok(result.rows_affected() == 1)
}

/// Upserts one subscription row. Returns false if the id belongs to
/// another user.
async fn write_subscription(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    sub: &Subscription,
    is_current: bool,
) -> Result<bool, DomainError> {
    let result = sqlx::query(
        r#"
        INSERT INTO billing_subscriptions (
            provider_subscription_id, user_id, is_current, plan_id, status,
            current_period_start, current_period_end, quota_used,
            status_marker_at, status_marker_event_id, plan_marker_at, plan_marker_event_id,
            created_at, canceled_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (provider_subscription_id) DO UPDATE SET
            is_current = EXCLUDED.is_current,
            plan_id = EXCLUDED.plan_id,
            status = EXCLUDED.status,
            current_period_start = EXCLUDED.current_period_start,
            current_period_end = EXCLUDED.current_period_end,
            quota_used = EXCLUDED.quota_used,
            status_marker_at = EXCLUDED.status_marker_at,
            status_marker_event_id = EXCLUDED.status_marker_event_id,
            plan_marker_at = EXCLUDED.plan_marker_at,
            plan_marker_event_id = EXCLUDED.plan_marker_event_id,
            canceled_at = EXCLUDED.canceled_at
        WHERE billing_subscriptions.user_id = EXCLUDED.user_id
        "#,
    )
    .bind(&sub.provider_subscription_id)
    .bind(user_id.as_str())
    .bind(is_current)
    .bind(sub.plan_id.as_str())
    .bind(sub.status.as_str())
    .bind(sub.current_period_start.map(|t| *t.as_datetime()))
    .bind(sub.current_period_end.map(|t| *t.as_datetime()))
    .bind(to_db_count(sub.quota_used, "quota_used")?)
    .bind(sub.status_marker.as_ref().map(|m| *m.occurred_at.as_datetime()))
    .bind(sub.status_marker.as_ref().map(|m| m.event_id.as_str()))
    .bind(sub.plan_marker.as_ref().map(|m| *m.occurred_at.as_datetime()))
    .bind(sub.plan_marker.as_ref().map(|m| m.event_id.as_str()))
    .bind(sub.created_at.as_datetime())
    .bind(sub.canceled_at.map(|t| *t.as_datetime()))
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to write subscription", e))?;

    Ok(result.rows_affected() == 1)
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        self.load(user_id.as_str()).await
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserAccount>, DomainError> {
        let owner: Option<String> = sqlx::query_scalar(
            "SELECT user_id FROM billing_subscriptions WHERE provider_subscription_id = $1",
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find subscription owner", e))?;

        match owner {
            Some(user_id) => self.load(&user_id).await,
            None => Ok(None),
        }
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserAccount>, DomainError> {
        let owner: Option<String> = sqlx::query_scalar(
            r#"
            SELECT user_id FROM billing_accounts
            WHERE provider_customer_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find account by customer", e))?;

        match owner {
            Some(user_id) => self.load(&user_id).await,
            None => Ok(None),
        }
    }

    async fn save(&self, account: &UserAccount) -> Result<SaveOutcome, DomainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        if !write_account(&mut tx, account).await? {
            return Ok(SaveOutcome::VersionConflict);
        }

        // Retired rows first so the one-current-per-user index never sees two.
        let rows = account
            .retired_subscriptions
            .iter()
            .map(|s| (s, false))
            .chain(account.subscription.iter().map(|s| (s, true)));
        for (sub, is_current) in rows {
            if !write_subscription(&mut tx, &account.user_id, sub, is_current).await? {
                return Ok(SaveOutcome::SubscriptionOwnedElsewhere {
                    subscription_id: sub.provider_subscription_id.clone(),
                });
            }
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit billing account", e))?;

        Ok(SaveOutcome::Saved {
            version: account.version + 1,
        })
    }

    async fn record_usage(
        &self,
        user_id: &UserId,
        cost: u64,
        ceiling: Option<u64>,
    ) -> Result<UsageOutcome, DomainError> {
        let cost = to_db_count(cost, "cost")?;
        let ceiling = ceiling.map(|c| to_db_count(c, "ceiling")).transpose()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        // Account row before subscription row, the same order `save` takes them.
        let locked: Option<i64> =
            sqlx::query_scalar("SELECT version FROM billing_accounts WHERE user_id = $1 FOR UPDATE")
                .bind(user_id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error("Failed to lock billing account", e))?;
        if locked.is_none() {
            return Ok(UsageOutcome::NoSubscription);
        }

        let recorded: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE billing_subscriptions SET quota_used = quota_used + $2
            WHERE user_id = $1
              AND is_current
              AND ($3::BIGINT IS NULL OR quota_used + $2 <= $3)
            RETURNING quota_used
            "#,
        )
        .bind(user_id.as_str())
        .bind(cost)
        .bind(ceiling)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to record usage", e))?;

        let Some(quota_used) = recorded else {
            let current: Option<i64> = sqlx::query_scalar(
                "SELECT quota_used FROM billing_subscriptions WHERE user_id = $1 AND is_current",
            )
            .bind(user_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to read usage", e))?;

            return Ok(match current {
                Some(used) => UsageOutcome::WouldExceed {
                    quota_used: from_db_count(used, "quota_used")?,
                },
                None => UsageOutcome::NoSubscription,
            });
        };

        sqlx::query(
            "UPDATE billing_accounts SET version = version + 1, updated_at = $2 WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to bump account version", e))?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit usage", e))?;

        Ok(UsageOutcome::Recorded {
            quota_used: from_db_count(quota_used, "quota_used")?,
        })
    }
}
