//! QuotaGate - authorizes and records usage against the local read model.
//!
//! Never calls the provider. `consume` is the atomic path: the store only
//! charges the cost if the plan's limit still holds at write time.

use std::sync::Arc;

use crate::domain::billing::{evaluate_quota, DenialReason, PlanCatalog, QuotaDecision};
use crate::domain::foundation::{DomainError, UserId};
use crate::ports::{SubscriptionStore, UsageOutcome};

pub struct QuotaGate {
    store: Arc<dyn SubscriptionStore>,
    catalog: Arc<PlanCatalog>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn SubscriptionStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    /// Preflight check; writes nothing.
    pub async fn authorize(&self, user_id: &UserId, cost: u64) -> Result<QuotaDecision, DomainError> {
        let account = self.store.find_by_user(user_id).await?;
        Ok(evaluate_quota(account.as_ref(), &self.catalog, cost))
    }

    /// Unconditionally adds `cost` to the current period's usage.
    pub async fn record_usage(&self, user_id: &UserId, cost: u64) -> Result<UsageOutcome, DomainError> {
        let outcome = self.store.record_usage(user_id, cost, None).await?;
        if let UsageOutcome::Recorded { quota_used } = outcome {
            tracing::debug!(user_id = %user_id, cost, quota_used, "Usage recorded");
        }
        Ok(outcome)
    }

    /// Authorizes and charges in one step.
    pub async fn consume(&self, user_id: &UserId, cost: u64) -> Result<QuotaDecision, DomainError> {
        let account = self.store.find_by_user(user_id).await?;
        let decision = evaluate_quota(account.as_ref(), &self.catalog, cost);
        if !decision.is_allowed() {
            return Ok(decision);
        }

        // evaluate_quota only allows known plans on a current subscription.
        let Some(limit) = account
            .as_ref()
            .and_then(|a| a.subscription.as_ref())
            .and_then(|s| self.catalog.get(&s.plan_id))
            .map(|p| p.quota_limit)
        else {
            return Ok(QuotaDecision::Denied {
                reason: DenialReason::NoSubscription,
            });
        };

        let decision = match self.store.record_usage(user_id, cost, Some(limit)).await? {
            UsageOutcome::Recorded { quota_used } => QuotaDecision::Allowed {
                remaining_after: limit.saturating_sub(quota_used),
            },
            UsageOutcome::WouldExceed { quota_used } => QuotaDecision::Denied {
                reason: DenialReason::QuotaExceeded {
                    used: quota_used,
                    limit,
                    requested: cost,
                },
            },
            UsageOutcome::NoSubscription => QuotaDecision::Denied {
                reason: DenialReason::NoSubscription,
            },
        };

        match &decision {
            QuotaDecision::Allowed { remaining_after } => {
                tracing::debug!(user_id = %user_id, cost, remaining_after, "Usage consumed")
            }
            QuotaDecision::Denied { reason } => {
                tracing::info!(user_id = %user_id, cost, reason = ?reason, "Usage denied")
            }
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::domain::billing::{EventMarker, PlanId, Subscription, SubscriptionStatus, UserAccount};
    use crate::domain::foundation::Timestamp;
    use proptest::prelude::*;

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    async fn gate_with(status: SubscriptionStatus, plan: &str, used: u64) -> (QuotaGate, InMemorySubscriptionStore) {
        let store = InMemorySubscriptionStore::new();
        let mut account = UserAccount::new(user("u1"));
        let mut sub = Subscription::open(
            "sub_1",
            PlanId::new(plan).unwrap(),
            status,
            EventMarker::new(Timestamp::from_unix_secs(1).unwrap(), "evt_1"),
        );
        sub.quota_used = used;
        account.install_subscription(sub);
        store.save(&account).await.unwrap();

        let gate = QuotaGate::new(Arc::new(store.clone()), Arc::new(PlanCatalog::standard()));
        (gate, store)
    }

    // ══════════════════════════════════════════════════════════════
    // authorize
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_user_is_denied() {
        let gate = QuotaGate::new(
            Arc::new(InMemorySubscriptionStore::new()),
            Arc::new(PlanCatalog::standard()),
        );
        let decision = gate.authorize(&user("ghost"), 1).await.unwrap();
        assert_eq!(decision.into_result(), Err(DenialReason::NoSubscription));
    }

    #[tokio::test]
    async fn past_due_is_denied() {
        let (gate, _) = gate_with(SubscriptionStatus::PastDue, "basic", 0).await;
        let decision = gate.authorize(&user("u1"), 1).await.unwrap();
        assert_eq!(decision.into_result(), Err(DenialReason::NoSubscription));
    }

    #[tokio::test]
    async fn authorize_reports_remaining_and_writes_nothing() {
        let (gate, store) = gate_with(SubscriptionStatus::Active, "starter", 40).await;

        let decision = gate.authorize(&user("u1"), 10).await.unwrap();

        assert_eq!(decision, QuotaDecision::Allowed { remaining_after: 50 });
        let sub = store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.quota_used, 40);
    }

    // ══════════════════════════════════════════════════════════════
    // consume
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn consume_charges_up_to_the_limit_exactly() {
        let (gate, _) = gate_with(SubscriptionStatus::Active, "starter", 95).await;

        assert_eq!(
            gate.consume(&user("u1"), 5).await.unwrap(),
            QuotaDecision::Allowed { remaining_after: 0 }
        );
        assert_eq!(
            gate.consume(&user("u1"), 1).await.unwrap().into_result(),
            Err(DenialReason::QuotaExceeded {
                used: 100,
                limit: 100,
                requested: 1
            })
        );
    }

    #[tokio::test]
    async fn concurrent_consumers_never_overdraw() {
        let (gate, store) = gate_with(SubscriptionStatus::Active, "starter", 90).await;
        let gate = Arc::new(gate);

        let tasks = (0..20).map(|_| {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.consume(&user("u1"), 1).await.unwrap().is_allowed() })
        });
        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();

        assert_eq!(allowed, 10);
        let sub = store.find_by_user(&user("u1")).await.unwrap().unwrap().subscription.unwrap();
        assert_eq!(sub.quota_used, 100);
    }

    #[tokio::test]
    async fn record_usage_ignores_the_limit() {
        let (gate, _) = gate_with(SubscriptionStatus::Active, "starter", 99).await;

        let outcome = gate.record_usage(&user("u1"), 5).await.unwrap();

        assert_eq!(outcome, UsageOutcome::Recorded { quota_used: 104 });
    }

    proptest! {
        #[test]
        fn usage_never_decreases_without_a_period_change(costs in prop::collection::vec(0u64..50, 1..20)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let (gate, store) = gate_with(SubscriptionStatus::Active, "basic", 0).await;
                let mut last = 0;
                for cost in costs {
                    gate.consume(&user("u1"), cost).await.unwrap();
                    let used = store
                        .find_by_user(&user("u1"))
                        .await
                        .unwrap()
                        .unwrap()
                        .subscription
                        .unwrap()
                        .quota_used;
                    prop_assert!(used >= last);
                    prop_assert!(used <= 500);
                    last = used;
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
