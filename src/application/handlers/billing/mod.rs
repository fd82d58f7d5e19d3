//! Billing handlers.
//!
//! Commands:
//! - `HandleWebhookCommand` - Verify, dedupe and reconcile a provider webhook
//! - `BeginCheckoutCommand` - Open a checkout correlation
//!
//! Queries:
//! - `GetBillingStatusQuery` - Current subscription and quota for a user
//!
//! Services:
//! - `QuotaGate` - Authorize and record usage
//! - `LedgerRetention` - Periodic pruning of ledger and correlations

mod checkout_correlator;
mod get_billing_status;
mod handle_webhook;
mod ledger_retention;
mod quota_gate;

pub use checkout_correlator::{BeginCheckoutCommand, CheckoutCorrelator};
pub use get_billing_status::{
    BillingStatus, GetBillingStatusHandler, GetBillingStatusQuery, SubscriptionView,
};
pub use handle_webhook::{
    HandleWebhookCommand, HandleWebhookHandler, HandleWebhookResult, DEFAULT_CONFLICT_RETRY_LIMIT,
};
pub use ledger_retention::{LedgerRetention, RetentionReport, DEFAULT_LEDGER_RETENTION_DAYS};
pub use quota_gate::QuotaGate;
