//! CorrelationStore port - pending checkout correlations keyed by user.

use async_trait::async_trait;

use crate::domain::billing::PendingCorrelation;
use crate::domain::foundation::{DomainError, Timestamp, UserId};

#[async_trait]
pub trait CorrelationStore: Send + Sync {
    /// Stores `correlation`, replacing any prior entry for the same user.
    async fn put(&self, correlation: &PendingCorrelation) -> Result<(), DomainError>;

    /// Removes and returns the user's entry if it is still live at `now`.
    ///
    /// Atomic: of several concurrent callers at most one gets `Some`. An
    /// expired entry is removed and reported as `None`.
    async fn take(
        &self,
        user_id: &UserId,
        now: Timestamp,
    ) -> Result<Option<PendingCorrelation>, DomainError>;

    /// Puts back a taken entry unless a newer one was stored meanwhile.
    ///
    /// Returns whether the entry was restored.
    async fn restore(&self, correlation: &PendingCorrelation) -> Result<bool, DomainError>;

    /// Drops entries expired at `now`.
    async fn purge_expired(&self, now: Timestamp) -> Result<u64, DomainError>;
}
