//! GetBillingStatusHandler - Query handler for a user's subscription view.

use serde::Serialize;
use std::sync::Arc;

use crate::domain::billing::{PlanCatalog, PlanId, SubscriptionStatus};
use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::SubscriptionStore;

#[derive(Debug, Clone)]
pub struct GetBillingStatusQuery {
    pub user_id: UserId,
}

/// Read model returned to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingStatus {
    pub user_id: UserId,
    /// None until a checkout has been confirmed.
    pub subscription: Option<SubscriptionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub plan_id: PlanId,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub quota_used: u64,
    pub quota_limit: u64,
    pub quota_remaining: u64,
    pub current_period_end: Option<Timestamp>,
    pub canceled_at: Option<Timestamp>,
}

pub struct GetBillingStatusHandler {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
}

impl GetBillingStatusHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn handle(&self, query: GetBillingStatusQuery) -> Result<BillingStatus, DomainError> {
        let account = self.store.find_by_user(&query.user_id).await?;

        let subscription = account.and_then(|a| a.subscription).map(|sub| {
            // A plan dropped from the catalog shows as zero quota.
            let (plan_name, quota_limit) = self
                .catalog
                .get(&sub.plan_id)
                .map(|p| (p.name.clone(), p.quota_limit))
                .unwrap_or_else(|| (sub.plan_id.to_string(), 0));

            SubscriptionView {
                quota_remaining: sub.remaining(quota_limit),
                subscription_id: sub.provider_subscription_id,
                plan_id: sub.plan_id,
                plan_name,
                status: sub.status,
                quota_used: sub.quota_used,
                quota_limit,
                current_period_end: sub.current_period_end,
                canceled_at: sub.canceled_at,
            }
        });

        Ok(BillingStatus {
            user_id: query.user_id,
            subscription,
        })
    }
}
