//! CustomerSync port - write-back of the user id onto the provider customer.
//!
//! Called off the webhook path. Failures are logged, never surfaced to the
//! provider's delivery.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::UserId;

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl SyncError {
    /// Network failures, rate limits and provider 5xx are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Network(_) => true,
            SyncError::Provider { status, .. } => *status == 429 || *status >= 500,
            SyncError::Exhausted { .. } => false,
        }
    }
}

#[async_trait]
pub trait CustomerSync: Send + Sync {
    /// Tags the provider customer with the local user id.
    async fn tag_customer(&self, customer_id: &str, user_id: &UserId) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::Network("reset".into()).is_transient());
        assert!(SyncError::Provider { status: 503, message: String::new() }.is_transient());
        assert!(SyncError::Provider { status: 429, message: String::new() }.is_transient());
        assert!(!SyncError::Provider { status: 404, message: String::new() }.is_transient());
        assert!(!SyncError::Exhausted { attempts: 3, last: String::new() }.is_transient());
    }
}
