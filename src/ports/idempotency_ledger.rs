//! IdempotencyLedger port - which provider events have been applied.
//!
//! Providers deliver at least once, so the same event id can arrive many
//! times and concurrently. The ledger's insert-if-absent is the arbiter:
//! exactly one caller sees `Fresh` for a given id, everyone else sees
//! `AlreadyApplied`. There is no separate "check" call to race against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::billing::VerifiedEvent;
use crate::domain::foundation::{DomainError, Timestamp};

/// Ledger entry for an applied event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedEvent {
    /// Provider event id (evt_xxx).
    pub event_id: String,
    pub event_type: String,
    pub applied_at: Timestamp,
}

impl AppliedEvent {
    pub fn new(event_id: impl Into<String>, event_type: impl Into<String>, applied_at: Timestamp) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            applied_at,
        }
    }

    /// Entry for `event`, stamped now.
    pub fn for_event(event: &VerifiedEvent) -> Self {
        Self::new(event.event_id.clone(), event.event_type.clone(), Timestamp::now())
    }
}

/// Outcome of claiming an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    /// First claim; the caller must apply the event.
    Fresh,
    /// Already claimed; the caller must not apply it again.
    AlreadyApplied,
}

#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Atomically records `entry` unless its event id is already present.
    async fn check_and_record(&self, entry: &AppliedEvent) -> Result<LedgerOutcome, DomainError>;

    /// Removes an entry so a redelivery of the event is processed again.
    ///
    /// Used when applying a claimed event failed transiently. Returns
    /// whether an entry was removed.
    async fn release(&self, event_id: &str) -> Result<bool, DomainError>;

    async fn find(&self, event_id: &str) -> Result<Option<AppliedEvent>, DomainError>;

    /// Deletes entries applied before `cutoff`, returning how many went.
    ///
    /// Backends with native expiry may return 0 and let entries age out.
    async fn prune_before(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
