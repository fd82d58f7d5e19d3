//! Subscription and user account aggregate.

use serde::{Deserialize, Serialize};

use super::plan::PlanId;
use super::status::SubscriptionStatus;
use crate::domain::foundation::{Timestamp, UserId};

/// Position of an event in provider time.
///
/// Ordered by `occurred_at`, then by `event_id` so that two events carrying
/// the same second still have a single deterministic winner.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventMarker {
    pub occurred_at: Timestamp,
    pub event_id: String,
}

impl EventMarker {
    pub fn new(occurred_at: Timestamp, event_id: impl Into<String>) -> Self {
        Self {
            occurred_at,
            event_id: event_id.into(),
        }
    }

    /// True if `candidate` is strictly newer than the recorded marker.
    pub fn admits(recorded: Option<&EventMarker>, candidate: &EventMarker) -> bool {
        recorded.map_or(true, |r| candidate > r)
    }

    /// Keeps the newer of the recorded marker and `candidate`.
    pub fn advance(recorded: &mut Option<EventMarker>, candidate: &EventMarker) {
        if Self::admits(recorded.as_ref(), candidate) {
            *recorded = Some(candidate.clone());
        }
    }
}

/// A provider subscription as mirrored locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub provider_subscription_id: String,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<Timestamp>,
    pub current_period_end: Option<Timestamp>,
    pub quota_used: u64,
    /// Newest event that wrote `status`.
    pub status_marker: Option<EventMarker>,
    /// Newest event that wrote `plan_id`.
    pub plan_marker: Option<EventMarker>,
    pub created_at: Timestamp,
    pub canceled_at: Option<Timestamp>,
}

impl Subscription {
    /// Opens a subscription from a confirmed checkout.
    pub fn open(
        provider_subscription_id: impl Into<String>,
        plan_id: PlanId,
        status: SubscriptionStatus,
        marker: EventMarker,
    ) -> Self {
        let created_at = marker.occurred_at;
        let status_marker = match status {
            SubscriptionStatus::Pending => None,
            _ => Some(marker.clone()),
        };
        Self {
            provider_subscription_id: provider_subscription_id.into(),
            plan_id,
            status,
            current_period_start: None,
            current_period_end: None,
            quota_used: 0,
            status_marker,
            plan_marker: Some(marker),
            created_at,
            canceled_at: None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.status == SubscriptionStatus::Canceled
    }

    /// Adds consumed units. Saturates instead of wrapping.
    pub fn consume(&mut self, cost: u64) -> u64 {
        self.quota_used = self.quota_used.saturating_add(cost);
        self.quota_used
    }

    /// Remaining units against `quota_limit`, zero when overdrawn.
    pub fn remaining(&self, quota_limit: u64) -> u64 {
        quota_limit.saturating_sub(self.quota_used)
    }

    /// Merges an observed billing period.
    ///
    /// Both bounds only move forward. Usage resets when the period start
    /// advances strictly past the recorded one. Returns true if anything
    /// changed.
    pub fn observe_period(&mut self, start: Option<Timestamp>, end: Option<Timestamp>) -> bool {
        let mut changed = false;

        if let Some(start) = start {
            if self.current_period_start.map_or(true, |s| start > s) {
                self.current_period_start = Some(start);
                self.quota_used = 0;
                changed = true;
            }
        }
        if let Some(end) = end {
            if self.current_period_end.map_or(true, |e| end > e) {
                self.current_period_end = Some(end);
                changed = true;
            }
        }

        changed
    }
}

/// Per-user billing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    pub provider_customer_id: Option<String>,
    /// The subscription quota decisions are made against.
    pub subscription: Option<Subscription>,
    /// Subscriptions replaced by a later checkout, kept to block resurrection.
    pub retired_subscriptions: Vec<Subscription>,
    /// Optimistic concurrency token. Zero means "never stored".
    pub version: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserAccount {
    /// A blank account for a user seen for the first time.
    pub fn new(user_id: UserId) -> Self {
        let now = Timestamp::now();
        Self {
            user_id,
            provider_customer_id: None,
            subscription: None,
            retired_subscriptions: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    /// Finds a subscription by provider id, current or retired.
    pub fn find_subscription(&self, provider_subscription_id: &str) -> Option<&Subscription> {
        self.subscriptions()
            .find(|s| s.provider_subscription_id == provider_subscription_id)
    }

    pub fn find_subscription_mut(
        &mut self,
        provider_subscription_id: &str,
    ) -> Option<&mut Subscription> {
        self.subscription
            .iter_mut()
            .chain(self.retired_subscriptions.iter_mut())
            .find(|s| s.provider_subscription_id == provider_subscription_id)
    }

    /// Current subscription first, then retired ones.
    pub fn subscriptions(&self) -> impl Iterator<Item = &Subscription> {
        self.subscription.iter().chain(self.retired_subscriptions.iter())
    }

    /// Makes `next` the current subscription, retiring the previous one.
    ///
    /// Returns the retired subscription's provider id if it was still live.
    pub fn install_subscription(&mut self, next: Subscription) -> Option<String> {
        let previous = self.subscription.replace(next)?;
        let superseded_live = (!previous.is_canceled()).then(|| previous.provider_subscription_id.clone());
        self.retired_subscriptions.push(previous);
        superseded_live
    }
}
