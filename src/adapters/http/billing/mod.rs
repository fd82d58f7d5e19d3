//! HTTP adapter for billing endpoints.
//!
//! - `POST /api/webhooks/stripe` - Provider webhook deliveries
//! - `POST /api/billing/checkout` - Begin checkout correlation
//! - `GET /api/billing/subscription` - Subscription and quota
//! - `GET /api/billing/quota` - Preflight quota check
//! - `POST /api/billing/usage` - Authorize and record usage
//! - `GET /health` - Liveness

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{AuthenticatedUser, BillingApiError, BillingAppState};
pub use routes::{billing_router, billing_routes, webhook_routes};
