//! Stripe customer metadata write-back.
//!
//! Tags the Stripe customer with `metadata[user_id]` so support tooling and
//! later checkouts can find the local user. Transient failures are retried
//! with capped exponential backoff.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::foundation::UserId;
use crate::ports::{CustomerSync, SyncError};

/// Default Stripe API base URL.
pub const STRIPE_API_BASE_URL: &str = "https://api.stripe.com";

/// Backoff schedule for write-back attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `retry` (0-based): `base * 2^retry`, capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

pub struct StripeCustomerSync {
    api_key: SecretString,
    api_base_url: String,
    backoff: BackoffConfig,
    http_client: reqwest::Client,
}

impl StripeCustomerSync {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            api_key,
            api_base_url: STRIPE_API_BASE_URL.to_string(),
            backoff: BackoffConfig::default(),
            http_client: reqwest::Client::new(),
        }
    }

    /// Set a custom API base URL (for testing).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    async fn tag_once(&self, customer_id: &str, user_id: &UserId) -> Result<(), SyncError> {
        let url = format!("{}/v1/customers/{}", self.api_base_url, customer_id);

        let response = self
            .http_client
            .post(&url)
            .basic_auth(self.api_key.expose_secret(), Option::<&str>::None)
            .form(&[("metadata[user_id]", user_id.as_str())])
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(SyncError::Provider {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl CustomerSync for StripeCustomerSync {
    async fn tag_customer(&self, customer_id: &str, user_id: &UserId) -> Result<(), SyncError> {
        let attempts = self.backoff.max_attempts.max(1);
        let mut retry = 0;

        loop {
            match self.tag_once(customer_id, user_id).await {
                Ok(()) => {
                    debug!(customer_id, user_id = %user_id, attempt = retry + 1, "Stripe customer tagged");
                    return Ok(());
                }
                Err(e) if e.is_transient() && retry + 1 < attempts => {
                    let delay = self.backoff.delay_for_retry(retry);
                    warn!(
                        customer_id,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Stripe customer update failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(SyncError::Exhausted {
                        attempts,
                        last: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Used when no Stripe API key is configured.
#[derive(Debug, Clone, Default)]
pub struct NoopCustomerSync;

#[async_trait]
impl CustomerSync for NoopCustomerSync {
    async fn tag_customer(&self, customer_id: &str, user_id: &UserId) -> Result<(), SyncError> {
        debug!(customer_id, user_id = %user_id, "Customer write-back disabled");
        Ok(())
    }
}
