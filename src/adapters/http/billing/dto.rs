//! HTTP DTOs for billing endpoints.

use serde::{Deserialize, Serialize};

use crate::application::handlers::billing::{BillingStatus, HandleWebhookResult};
use crate::domain::billing::{DenialReason, PendingCorrelation, QuotaDecision, SubscriptionStatus};
use crate::domain::foundation::Timestamp;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to begin a checkout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BeginCheckoutRequest {
    /// Provider price the user selected.
    #[serde(default)]
    pub price_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaQuery {
    #[serde(default = "default_cost")]
    pub cost: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordUsageRequest {
    #[serde(default = "default_cost")]
    pub cost: u64,
}

fn default_cost() -> u64 {
    1
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Handle the client passes to the provider checkout as client reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub correlation_id: String,
    pub client_reference_id: String,
    pub price_id: Option<String>,
    /// ISO 8601.
    pub expires_at: String,
}

impl From<PendingCorrelation> for CheckoutResponse {
    fn from(c: PendingCorrelation) -> Self {
        Self {
            correlation_id: c.id.to_string(),
            client_reference_id: c.user_id.to_string(),
            price_id: c.price_id,
            expires_at: rfc3339(c.expires_at),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<SubscriptionViewResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionViewResponse {
    pub subscription_id: String,
    pub plan_id: String,
    pub plan_name: String,
    pub status: SubscriptionStatus,
    pub quota_used: u64,
    pub quota_limit: u64,
    pub quota_remaining: u64,
    pub current_period_end: Option<String>,
    pub canceled_at: Option<String>,
}

impl From<BillingStatus> for SubscriptionResponse {
    fn from(status: BillingStatus) -> Self {
        Self {
            subscription: status.subscription.map(|s| SubscriptionViewResponse {
                subscription_id: s.subscription_id,
                plan_id: s.plan_id.to_string(),
                plan_name: s.plan_name,
                status: s.status,
                quota_used: s.quota_used,
                quota_limit: s.quota_limit,
                quota_remaining: s.quota_remaining,
                current_period_end: s.current_period_end.map(rfc3339),
                canceled_at: s.canceled_at.map(rfc3339),
            }),
        }
    }
}

/// Outcome of a quota check or charge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialReason>,
}

impl From<QuotaDecision> for QuotaResponse {
    fn from(decision: QuotaDecision) -> Self {
        match decision {
            QuotaDecision::Allowed { remaining_after } => Self {
                allowed: true,
                remaining_after: Some(remaining_after),
                denial: None,
            },
            QuotaDecision::Denied { reason } => Self {
                allowed: false,
                remaining_after: None,
                denial: Some(reason),
            },
        }
    }
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAckResponse {
    pub received: bool,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl WebhookAckResponse {
    pub fn new(outcome: impl Into<String>, event_id: Option<String>) -> Self {
        Self {
            received: true,
            outcome: outcome.into(),
            event_id,
        }
    }
}

impl From<&HandleWebhookResult> for WebhookAckResponse {
    fn from(result: &HandleWebhookResult) -> Self {
        let outcome = match result {
            HandleWebhookResult::Applied { .. } => "applied",
            HandleWebhookResult::Unchanged { .. } => "unchanged",
            HandleWebhookResult::Duplicate { .. } => "duplicate",
            HandleWebhookResult::Ignored { .. } => "ignored",
        };
        Self::new(outcome, Some(result.event_id().to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Standard error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn rfc3339(ts: Timestamp) -> String {
    ts.as_datetime().to_rfc3339()
}
