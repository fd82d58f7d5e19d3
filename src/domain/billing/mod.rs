//! Billing domain - subscription lifecycle, event reconciliation, quota.
//!
//! Pure types and functions only. Storage and transport live behind ports.

mod correlation;
mod errors;
mod event;
mod plan;
mod quota;
mod reconciler;
mod status;
mod subscription;
mod verifier;

pub use correlation::{PendingCorrelation, DEFAULT_CORRELATION_TTL_MINUTES};
pub use errors::{AuthenticityError, WebhookError};
pub use event::{
    CheckoutCompleted, EventPayload, InvoicePaid, InvoicePaymentFailed, PaymentStatus,
    ProviderEventType, SubscriptionDeleted, SubscriptionUpdated, VerifiedEvent,
};
pub use plan::{Plan, PlanCatalog, PlanId};
pub use quota::{evaluate as evaluate_quota, DenialReason, QuotaDecision};
pub use reconciler::{reconcile, Anomaly, Effect, Reconciliation};
pub use status::SubscriptionStatus;
pub use subscription::{EventMarker, Subscription, UserAccount};
pub use verifier::{signature_header, SignatureHeader, WebhookVerifier, DEFAULT_TOLERANCE_SECS};
