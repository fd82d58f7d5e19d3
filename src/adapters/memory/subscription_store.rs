//! In-memory subscription store with optimistic versioning.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::billing::UserAccount;
use crate::domain::foundation::{DomainError, Timestamp, UserId};
use crate::ports::{SaveOutcome, SubscriptionStore, UsageOutcome};

#[derive(Debug, Default)]
struct Tables {
    accounts: HashMap<UserId, UserAccount>,
    /// Provider subscription id to owning user.
    subscription_owners: HashMap<String, UserId>,
}

impl Tables {
    fn owner_of(&self, subscription_id: &str) -> Option<&UserId> {
        self.subscription_owners.get(subscription_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySubscriptionStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError> {
        Ok(self.tables.read().await.accounts.get(user_id).cloned())
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserAccount>, DomainError> {
        let tables = self.tables.read().await;
        Ok(tables
            .owner_of(subscription_id)
            .and_then(|user| tables.accounts.get(user))
            .cloned())
    }

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserAccount>, DomainError> {
        let tables = self.tables.read().await;
        Ok(tables
            .accounts
            .values()
            .find(|a| a.provider_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn save(&self, account: &UserAccount) -> Result<SaveOutcome, DomainError> {
        let mut tables = self.tables.write().await;

        let stored_version = tables.accounts.get(&account.user_id).map_or(0, |a| a.version);
        if stored_version != account.version {
            return Ok(SaveOutcome::VersionConflict);
        }

        for sub in account.subscriptions() {
            if let Some(owner) = tables.owner_of(&sub.provider_subscription_id) {
                if owner != &account.user_id {
                    return Ok(SaveOutcome::SubscriptionOwnedElsewhere {
                        subscription_id: sub.provider_subscription_id.clone(),
                    });
                }
            }
        }

        let mut stored = account.clone();
        stored.version = account.version + 1;
        for sub in stored.subscriptions() {
            tables
                .subscription_owners
                .insert(sub.provider_subscription_id.clone(), stored.user_id.clone());
        }
        let version = stored.version;
        tables.accounts.insert(stored.user_id.clone(), stored);

        Ok(SaveOutcome::Saved { version })
    }

    async fn record_usage(
        &self,
        user_id: &UserId,
        cost: u64,
        ceiling: Option<u64>,
    ) -> Result<UsageOutcome, DomainError> {
        let mut tables = self.tables.write().await;

        let Some(account) = tables.accounts.get_mut(user_id) else {
            return Ok(UsageOutcome::NoSubscription);
        };
        let Some(sub) = account.subscription.as_mut() else {
            return Ok(UsageOutcome::NoSubscription);
        };

        if let Some(ceiling) = ceiling {
            let within = sub.quota_used.checked_add(cost).map_or(false, |t| t <= ceiling);
            if !within {
                return Ok(UsageOutcome::WouldExceed {
                    quota_used: sub.quota_used,
                });
            }
        }

        let quota_used = sub.consume(cost);
        account.version += 1;
        account.updated_at = Timestamp::now();
        Ok(UsageOutcome::Recorded { quota_used })
    }
}
