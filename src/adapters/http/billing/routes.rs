//! Axum router configuration for billing endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    begin_checkout, check_quota, get_subscription, handle_stripe_webhook, health, record_usage,
    BillingAppState,
};

/// User endpoints, mounted at `/api/billing`. Require `X-User-Id`.
///
/// - `POST /checkout` - Begin checkout correlation
/// - `GET /subscription` - Subscription and quota read model
/// - `GET /quota?cost=N` - Preflight quota check
/// - `POST /usage` - Authorize and record usage
pub fn billing_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/checkout", post(begin_checkout))
        .route("/subscription", get(get_subscription))
        .route("/quota", get(check_quota))
        .route("/usage", post(record_usage))
}

/// Webhook endpoints, mounted at `/api/webhooks`. No user auth; the
/// signature is the credential.
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Complete billing router with state applied.
pub fn billing_router(state: BillingAppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/billing", billing_routes())
        .nest("/api/webhooks", webhook_routes())
        .with_state(state)
}
