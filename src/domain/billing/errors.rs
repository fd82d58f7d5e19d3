//! Webhook error taxonomy.
//!
//! Every variant maps to an HTTP status that tells the provider whether to
//! redeliver: 2xx acknowledges, 4xx drops, 5xx retries.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::DomainError;

/// Reasons an inbound notification failed authentication.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticityError {
    #[error("Signature header missing")]
    MissingHeader,

    #[error("Malformed signature header: {0}")]
    MalformedHeader(String),

    #[error("No signature matched")]
    SignatureMismatch,

    #[error("Signature timestamp too old")]
    TimestampTooOld,

    #[error("Signature timestamp in the future")]
    TimestampInFuture,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    /// Body or header failed verification; nothing downstream ran.
    #[error("Authenticity check failed: {0}")]
    Authenticity(#[from] AuthenticityError),

    /// Authentic body that does not decode into a known shape.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Event references a subscription no account owns. Logged as an
    /// anomaly and acknowledged.
    #[error("Unknown subscription: {subscription_id}")]
    UnknownSubscription { subscription_id: String },

    /// Optimistic writes kept losing; the provider should redeliver.
    #[error("Gave up after {attempts} conflicting writes for user {user_id}")]
    ConflictRetryExhausted { user_id: String, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl WebhookError {
    /// Returns true if a redelivery may succeed.
    ///
    /// The ledger entry for the event is released on these so the retry is
    /// not swallowed as a duplicate.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::ConflictRetryExhausted { .. } | WebhookError::Storage(_)
        )
    }

    /// Maps the error to the status returned to the provider.
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::Authenticity(_) | WebhookError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            WebhookError::UnknownSubscription { .. } => StatusCode::OK,
            WebhookError::ConflictRetryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            WebhookError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for response bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            WebhookError::Authenticity(_) => "AUTHENTICITY_FAILED",
            WebhookError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            WebhookError::UnknownSubscription { .. } => "UNKNOWN_SUBSCRIPTION",
            WebhookError::ConflictRetryExhausted { .. } => "CONFLICT_RETRY_EXHAUSTED",
            WebhookError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<DomainError> for WebhookError {
    fn from(err: DomainError) -> Self {
        WebhookError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ══════════════════════════════════════════════════════════════
    // Status mapping
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn authenticity_failures_are_bad_request() {
        for reason in [
            AuthenticityError::MissingHeader,
            AuthenticityError::MalformedHeader("t missing".into()),
            AuthenticityError::SignatureMismatch,
            AuthenticityError::TimestampTooOld,
            AuthenticityError::TimestampInFuture,
        ] {
            let err = WebhookError::from(reason);
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn unknown_subscription_is_acknowledged() {
        let err = WebhookError::UnknownSubscription {
            subscription_id: "sub_x".into(),
        };
        assert!(err.status_code().is_success());
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflict_exhaustion_asks_for_redelivery() {
        let err = WebhookError::ConflictRetryExhausted {
            user_id: "u1".into(),
            attempts: 5,
        };
        assert!(err.status_code().is_server_error());
        assert!(err.is_retryable());
    }

    #[test]
    fn domain_errors_become_retryable_storage_errors() {
        let err: WebhookError = DomainError::database("pool timed out").into();
        assert!(matches!(err, WebhookError::Storage(_)));
        assert!(err.is_retryable());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ══════════════════════════════════════════════════════════════
    // Display
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn display_includes_reason() {
        let err = WebhookError::from(AuthenticityError::SignatureMismatch);
        assert_eq!(
            err.to_string(),
            "Authenticity check failed: No signature matched"
        );
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            WebhookError::MalformedPayload("x".into()).code(),
            "MALFORMED_PAYLOAD"
        );
    }
}
