//! Quota decisions.
//!
//! Pure evaluation against the local read model. Fails secure: anything
//! that cannot be resolved to an active subscription on a known plan is a
//! denial.

use serde::{Deserialize, Serialize};

use super::plan::{PlanCatalog, PlanId};
use super::subscription::UserAccount;

/// Outcome of a quota check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allowed {
        /// Units left after the requested cost is spent.
        remaining_after: u64,
    },
    Denied {
        reason: DenialReason,
    },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allowed { .. })
    }

    pub fn into_result(self) -> Result<u64, DenialReason> {
        match self {
            QuotaDecision::Allowed { remaining_after } => Ok(remaining_after),
            QuotaDecision::Denied { reason } => Err(reason),
        }
    }
}

/// Why a quota check was denied. User-visible, not a system error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DenialReason {
    /// No subscription, or one that is not active.
    NoSubscription,

    /// Subscription points at a plan the catalog no longer has.
    PlanUnavailable { plan_id: PlanId },

    QuotaExceeded { used: u64, limit: u64, requested: u64 },
}

/// Decides whether `cost` more units fit into the account's plan.
pub fn evaluate(account: Option<&UserAccount>, catalog: &PlanCatalog, cost: u64) -> QuotaDecision {
    let Some(sub) = account
        .and_then(|a| a.subscription.as_ref())
        .filter(|s| s.status.grants_quota())
    else {
        return QuotaDecision::Denied {
            reason: DenialReason::NoSubscription,
        };
    };

    let Some(plan) = catalog.get(&sub.plan_id) else {
        return QuotaDecision::Denied {
            reason: DenialReason::PlanUnavailable {
                plan_id: sub.plan_id.clone(),
            },
        };
    };

    match sub.quota_used.checked_add(cost) {
        Some(total) if total <= plan.quota_limit => QuotaDecision::Allowed {
            remaining_after: plan.quota_limit - total,
        },
        _ => QuotaDecision::Denied {
            reason: DenialReason::QuotaExceeded {
                used: sub.quota_used,
                limit: plan.quota_limit,
                requested: cost,
            },
        },
    }
}
