//! Subscription status state machine.
//!
//! `pending → active → {past_due, canceled}`, `past_due → {active, canceled}`.
//! `canceled` is terminal: a resubscription arrives as a new subscription with
//! a new provider id, never as a transition out of `canceled`.

use crate::domain::foundation::StateMachine;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created by checkout but first payment not confirmed yet.
    Pending,

    /// Paid up. The only status that grants quota.
    Active,

    /// Latest invoice failed; provider is retrying.
    PastDue,

    /// Ended. Retained to block resurrection of the provider id.
    Canceled,
}

impl SubscriptionStatus {
    /// Returns true if this status lets the user consume quota.
    pub fn grants_quota(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    /// Maps a provider subscription status onto the local lifecycle.
    ///
    /// Returns `None` for values the provider may add later; callers treat
    /// those as "no status information".
    pub fn from_provider(status: &str) -> Option<Self> {
        match status {
            "incomplete" => Some(SubscriptionStatus::Pending),
            "active" | "trialing" => Some(SubscriptionStatus::Active),
            "past_due" | "unpaid" | "paused" => Some(SubscriptionStatus::PastDue),
            "canceled" | "incomplete_expired" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Parses the stored representation produced by [`as_str`](Self::as_str).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "past_due" => Some(SubscriptionStatus::PastDue),
            "canceled" => Some(SubscriptionStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Pending, Active)
                | (Pending, Canceled)
                | (Active, PastDue)
                | (Active, Canceled)
                | (PastDue, Active)
                | (PastDue, Canceled)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Pending => vec![Active, Canceled],
            Active => vec![PastDue, Canceled],
            PastDue => vec![Active, Canceled],
            Canceled => vec![],
        }
    }
}
