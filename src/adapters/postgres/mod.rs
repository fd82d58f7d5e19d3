//! PostgreSQL adapters - Database implementations for the billing ports.
//!
//! - `PostgresSubscriptionStore` - Versioned accounts and subscriptions
//! - `PostgresLedger` - Webhook idempotency ledger
//! - `PostgresCorrelationStore` - Pending checkout correlations

use once_cell::sync::Lazy;
use sqlx::migrate::Migrator;
use sqlx::PgPool;

use crate::domain::foundation::{DomainError, ErrorCode};

mod correlation_store;
mod ledger;
mod subscription_store;

pub use correlation_store::PostgresCorrelationStore;
pub use ledger::PostgresLedger;
pub use subscription_store::PostgresSubscriptionStore;

static MIGRATOR: Lazy<Migrator> = Lazy::new(|| sqlx::migrate!("./migrations"));

/// Applies the bundled schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), DomainError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DomainError::new(ErrorCode::DatabaseError, format!("Migration failed: {}", e)))
}

fn db_error(context: &str, err: sqlx::Error) -> DomainError {
    DomainError::new(ErrorCode::DatabaseError, format!("{}: {}", context, err))
}
