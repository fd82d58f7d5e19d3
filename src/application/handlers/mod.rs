//! Application handlers.
//!
//! Command and query handlers that orchestrate domain operations.

pub mod billing;

pub use billing::{
    BeginCheckoutCommand, BillingStatus, CheckoutCorrelator, GetBillingStatusHandler,
    GetBillingStatusQuery, HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult,
    LedgerRetention, QuotaGate, RetentionReport, SubscriptionView,
};
