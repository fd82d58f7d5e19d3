//! Application layer - Commands, Queries, and Handlers.
//!
//! Orchestrates the pure billing domain against the ports. Command handlers
//! write, query handlers read.

pub mod handlers;

pub use handlers::{
    BeginCheckoutCommand, BillingStatus, CheckoutCorrelator, GetBillingStatusHandler,
    GetBillingStatusQuery, HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult,
    LedgerRetention, QuotaGate, RetentionReport, SubscriptionView,
};
