//! Payment configuration

use secrecy::SecretString;
use serde::Deserialize;
use std::fmt;

use super::error::ValidationError;
use crate::adapters::stripe::STRIPE_API_BASE_URL;
use crate::domain::billing::DEFAULT_TOLERANCE_SECS;

/// Payment provider configuration (Stripe)
#[derive(Clone, Default, Deserialize)]
pub struct PaymentConfig {
    /// Webhook signing secret
    pub stripe_webhook_secret: String,

    /// API key, only needed for customer metadata write-back
    pub stripe_api_key: Option<String>,

    /// Provider API base URL
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Accepted age of a webhook signature timestamp, in seconds
    #[serde(default = "default_signature_tolerance")]
    pub signature_tolerance_secs: i64,
}

impl PaymentConfig {
    pub fn webhook_secret(&self) -> SecretString {
        SecretString::new(self.stripe_webhook_secret.clone())
    }

    /// Returns None when write-back is disabled.
    pub fn api_key(&self) -> Option<SecretString> {
        self.stripe_api_key
            .as_ref()
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::new(k.clone()))
    }

    /// Check if using Stripe live mode
    pub fn is_live_mode(&self) -> bool {
        self.stripe_api_key
            .as_deref()
            .is_some_and(|k| k.starts_with("sk_live_"))
    }

    /// Validate payment configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.stripe_webhook_secret.is_empty() {
            return Err(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"));
        }
        if !self.stripe_webhook_secret.starts_with("whsec_") {
            return Err(ValidationError::InvalidStripeWebhookSecret);
        }
        if let Some(key) = self.stripe_api_key.as_deref().filter(|k| !k.is_empty()) {
            if !key.starts_with("sk_") {
                return Err(ValidationError::InvalidStripeKey);
            }
        }
        if !self.api_base_url.starts_with("https://") && !self.api_base_url.starts_with("http://") {
            return Err(ValidationError::InvalidApiBaseUrl);
        }
        if self.signature_tolerance_secs <= 0 {
            return Err(ValidationError::MustBePositive("signature_tolerance_secs"));
        }
        Ok(())
    }
}

impl fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("stripe_webhook_secret", &"[REDACTED]")
            .field("stripe_api_key", &self.stripe_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base_url", &self.api_base_url)
            .field("signature_tolerance_secs", &self.signature_tolerance_secs)
            .finish()
    }
}

fn default_api_base_url() -> String {
    STRIPE_API_BASE_URL.to_string()
}

fn default_signature_tolerance() -> i64 {
    DEFAULT_TOLERANCE_SECS
}
