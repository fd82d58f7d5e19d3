//! SubscriptionStore port - authoritative per-user billing record.
//!
//! Writes are optimistic: callers read an account, compute the next state,
//! and save with the version they read. A lost race returns
//! `VersionConflict` and the caller re-reads and retries.

use async_trait::async_trait;

use crate::domain::billing::UserAccount;
use crate::domain::foundation::{DomainError, UserId};

/// Result of a versioned save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Stored; the account's version is now `expected_version + 1`.
    Saved { version: u64 },
    /// Someone else wrote since the read.
    VersionConflict,
    /// A provider subscription id in the account already belongs to
    /// another user.
    SubscriptionOwnedElsewhere { subscription_id: String },
}

/// Result of an atomic usage increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageOutcome {
    Recorded { quota_used: u64 },
    /// The ceiling would be crossed; nothing was written.
    WouldExceed { quota_used: u64 },
    /// The user has no current subscription to charge.
    NoSubscription,
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_user(&self, user_id: &UserId) -> Result<Option<UserAccount>, DomainError>;

    /// Finds the account owning a provider subscription, current or retired.
    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> Result<Option<UserAccount>, DomainError>;

    async fn find_by_customer_id(
        &self,
        customer_id: &str,
    ) -> Result<Option<UserAccount>, DomainError>;

    /// Saves `account` if the stored version still equals
    /// `account.version`. Version 0 means "insert, must not exist".
    async fn save(&self, account: &UserAccount) -> Result<SaveOutcome, DomainError>;

    /// Atomically adds `cost` to the current subscription's usage.
    ///
    /// With `ceiling`, the increment only happens if the new total stays
    /// within it, which makes check-and-charge a single atomic step.
    async fn record_usage(
        &self,
        user_id: &UserId,
        cost: u64,
        ceiling: Option<u64>,
    ) -> Result<UsageOutcome, DomainError>;
}
