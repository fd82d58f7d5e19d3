//! CheckoutCorrelator - bridges "user starts checkout" to the webhook that
//! later confirms it.

use chrono::Duration;
use std::sync::Arc;

use crate::domain::billing::{PendingCorrelation, PlanCatalog, DEFAULT_CORRELATION_TTL_MINUTES};
use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::CorrelationStore;

/// Command to open a checkout correlation.
#[derive(Debug, Clone)]
pub struct BeginCheckoutCommand {
    pub user_id: UserId,
    /// Price the user picked, if the caller knows it.
    pub price_id: Option<String>,
}

pub struct CheckoutCorrelator {
    store: Arc<dyn CorrelationStore>,
    catalog: Arc<PlanCatalog>,
    ttl: Duration,
}

impl CheckoutCorrelator {
    pub fn new(store: Arc<dyn CorrelationStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self {
            store,
            catalog,
            ttl: Duration::minutes(DEFAULT_CORRELATION_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Opens (or replaces) the user's pending correlation.
    ///
    /// Makes no provider call; the caller creates the provider checkout
    /// session with the user id as client reference.
    pub async fn begin(&self, cmd: BeginCheckoutCommand) -> Result<PendingCorrelation, DomainError> {
        self.begin_at(cmd, Timestamp::now()).await
    }

    pub async fn begin_at(
        &self,
        cmd: BeginCheckoutCommand,
        now: Timestamp,
    ) -> Result<PendingCorrelation, DomainError> {
        if let Some(price_id) = &cmd.price_id {
            if self.catalog.plan_for_price(price_id).is_none() {
                return Err(DomainError::validation(
                    "price_id",
                    format!("Unknown price: {}", price_id),
                ));
            }
        }

        let correlation = PendingCorrelation::new(cmd.user_id, cmd.price_id, now, self.ttl);
        self.store.put(&correlation).await?;

        tracing::info!(
            user_id = %correlation.user_id,
            correlation_id = %correlation.id,
            expires_at = %correlation.expires_at.as_datetime(),
            "Checkout correlation opened"
        );
        Ok(correlation)
    }

    /// Consumes the user's live correlation. First caller wins.
    pub async fn resolve(&self, user_id: &UserId) -> Result<Option<PendingCorrelation>, DomainError> {
        self.resolve_at(user_id, Timestamp::now()).await
    }

    pub async fn resolve_at(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<PendingCorrelation>, DomainError> {
        self.store.take(user_id, now).await
    }

    /// Returns a consumed correlation after the confirming webhook failed
    /// transiently, so the redelivery can still match it.
    pub async fn restore(&self, correlation: &PendingCorrelation) -> Result<bool, DomainError> {
        self.store.restore(correlation).await
    }
}
