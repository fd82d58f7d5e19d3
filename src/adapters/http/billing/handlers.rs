//! HTTP handlers for billing endpoints.
//!
//! These handlers connect Axum routes to the billing application handlers.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Json, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::application::handlers::billing::{
    BeginCheckoutCommand, CheckoutCorrelator, GetBillingStatusHandler, GetBillingStatusQuery,
    HandleWebhookCommand, HandleWebhookHandler, QuotaGate,
};
use crate::domain::billing::{AuthenticityError, DenialReason, QuotaDecision, WebhookError};
use crate::domain::foundation::{DomainError, ErrorCode, UserId};

use super::dto::{
    BeginCheckoutRequest, CheckoutResponse, ErrorResponse, HealthResponse, QuotaQuery,
    QuotaResponse, RecordUsageRequest, SubscriptionResponse, WebhookAckResponse,
};

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Header carrying the pre-validated user id from the identity layer.
pub const USER_ID_HEADER: &str = "X-User-Id";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared state for billing routes. Cloned per request.
#[derive(Clone)]
pub struct BillingAppState {
    pub webhook_handler: Arc<HandleWebhookHandler>,
    pub correlator: Arc<CheckoutCorrelator>,
    pub quota_gate: Arc<QuotaGate>,
    pub status_handler: Arc<GetBillingStatusHandler>,
}

// ════════════════════════════════════════════════════════════════════════════════
// User Context
// ════════════════════════════════════════════════════════════════════════════════

/// User id set by the upstream identity layer.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

pub struct AuthenticationRequired;

impl IntoResponse for AuthenticationRequired {
    fn into_response(self) -> Response {
        let error = ErrorResponse::new("AUTHENTICATION_REQUIRED", "Authentication is required");
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthenticationRequired;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| UserId::new(s).ok())
            .ok_or(AuthenticationRequired)?;

        Ok(AuthenticatedUser { user_id })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/webhooks/stripe - Handle a provider webhook delivery.
///
/// 200 once the event is applied or safely recorded, 400 on authenticity
/// failure, 5xx when the provider should redeliver.
pub async fn handle_stripe_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, BillingApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(WebhookError::Authenticity(AuthenticityError::MissingHeader))?;

    let cmd = HandleWebhookCommand {
        payload: body.to_vec(),
        signature: signature.to_string(),
    };

    match state.webhook_handler.handle(cmd).await {
        Ok(result) => Ok(Json(WebhookAckResponse::from(&result))),
        // Acknowledged anomalies still get a 2xx so the provider stops retrying.
        Err(err) if err.status_code().is_success() => {
            Ok(Json(WebhookAckResponse::new(err.code().to_ascii_lowercase(), None)))
        }
        Err(err) => Err(err.into()),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// User Endpoints
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/billing/checkout - Open a checkout correlation
pub async fn begin_checkout(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    request: Option<Json<BeginCheckoutRequest>>,
) -> Result<impl IntoResponse, BillingApiError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let cmd = BeginCheckoutCommand {
        user_id: user.user_id,
        price_id: request.price_id,
    };

    let correlation = state.correlator.begin(cmd).await?;

    Ok((StatusCode::CREATED, Json(CheckoutResponse::from(correlation))))
}

/// GET /api/billing/subscription - Current subscription and quota
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, BillingApiError> {
    let status = state
        .status_handler
        .handle(GetBillingStatusQuery {
            user_id: user.user_id,
        })
        .await?;

    Ok(Json(SubscriptionResponse::from(status)))
}

/// GET /api/billing/quota?cost=N - Preflight check, writes nothing
pub async fn check_quota(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Query(query): Query<QuotaQuery>,
) -> Result<impl IntoResponse, BillingApiError> {
    let decision = state.quota_gate.authorize(&user.user_id, query.cost).await?;
    Ok(Json(QuotaResponse::from(decision)))
}

/// POST /api/billing/usage - Authorize and charge in one step
pub async fn record_usage(
    State(state): State<BillingAppState>,
    user: AuthenticatedUser,
    Json(request): Json<RecordUsageRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    match state.quota_gate.consume(&user.user_id, request.cost).await? {
        decision @ QuotaDecision::Allowed { .. } => Ok(Json(QuotaResponse::from(decision))),
        QuotaDecision::Denied { reason } => Err(BillingApiError::Denied(reason)),
    }
}

/// GET /health - Liveness
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub enum BillingApiError {
    Webhook(WebhookError),
    Domain(DomainError),
    Denied(DenialReason),
}

impl From<WebhookError> for BillingApiError {
    fn from(err: WebhookError) -> Self {
        Self::Webhook(err)
    }
}

impl From<DomainError> for BillingApiError {
    fn from(err: DomainError) -> Self {
        Self::Domain(err)
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            BillingApiError::Webhook(err) => {
                (err.status_code(), ErrorResponse::new(err.code(), err.to_string()))
            }
            BillingApiError::Domain(err) => {
                let status = match err.code {
                    ErrorCode::ValidationFailed
                    | ErrorCode::EmptyField
                    | ErrorCode::OutOfRange
                    | ErrorCode::InvalidFormat => StatusCode::BAD_REQUEST,
                    ErrorCode::AccountNotFound
                    | ErrorCode::SubscriptionNotFound
                    | ErrorCode::PlanNotFound => StatusCode::NOT_FOUND,
                    ErrorCode::InvalidStateTransition | ErrorCode::Conflict => StatusCode::CONFLICT,
                    ErrorCode::DatabaseError | ErrorCode::CacheError | ErrorCode::InternalError => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!(error = %err, "Billing request failed");
                    // Storage details stay in the logs.
                    (status, ErrorResponse::new("INTERNAL_ERROR", "Internal error"))
                } else {
                    (status, ErrorResponse::new(err.code.to_string(), err.message))
                }
            }
            BillingApiError::Denied(reason) => {
                let (status, code, message) = match &reason {
                    DenialReason::NoSubscription => (
                        StatusCode::PAYMENT_REQUIRED,
                        "NO_SUBSCRIPTION",
                        "No active subscription",
                    ),
                    DenialReason::PlanUnavailable { .. } => (
                        StatusCode::PAYMENT_REQUIRED,
                        "PLAN_UNAVAILABLE",
                        "Subscribed plan is no longer offered",
                    ),
                    DenialReason::QuotaExceeded { .. } => (
                        StatusCode::TOO_MANY_REQUESTS,
                        "QUOTA_EXCEEDED",
                        "Quota for the current period is used up",
                    ),
                };
                let details = serde_json::to_value(&reason).unwrap_or_default();
                (status, ErrorResponse::new(code, message).with_details(details))
            }
        };

        (status, Json(body)).into_response()
    }
}
