//! Billing behaviour configuration

use serde::Deserialize;
use std::time::Duration as StdDuration;

use super::error::ValidationError;
use crate::application::handlers::billing::{
    DEFAULT_CONFLICT_RETRY_LIMIT, DEFAULT_LEDGER_RETENTION_DAYS,
};
use crate::domain::billing::DEFAULT_CORRELATION_TTL_MINUTES;

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    /// Lifetime of a pending checkout correlation
    #[serde(default = "default_correlation_ttl")]
    pub correlation_ttl_minutes: i64,

    /// Age after which applied event ids are forgotten
    #[serde(default = "default_ledger_retention")]
    pub ledger_retention_days: i64,

    /// Optimistic write attempts per webhook before asking for redelivery
    #[serde(default = "default_conflict_retry_limit")]
    pub conflict_retry_limit: u32,

    /// Seconds between retention sweeps
    #[serde(default = "default_sweep_interval")]
    pub retention_sweep_interval_secs: u64,

    /// Attempts for customer metadata write-back
    #[serde(default = "default_sync_attempts")]
    pub customer_sync_max_attempts: u32,
}

impl BillingConfig {
    pub fn correlation_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.correlation_ttl_minutes)
    }

    pub fn ledger_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.ledger_retention_days)
    }

    pub fn retention_sweep_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.retention_sweep_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.correlation_ttl_minutes <= 0 {
            return Err(ValidationError::MustBePositive("correlation_ttl_minutes"));
        }
        if self.ledger_retention_days <= 0 {
            return Err(ValidationError::MustBePositive("ledger_retention_days"));
        }
        if self.conflict_retry_limit == 0 {
            return Err(ValidationError::MustBePositive("conflict_retry_limit"));
        }
        if self.retention_sweep_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("retention_sweep_interval_secs"));
        }
        if self.customer_sync_max_attempts == 0 {
            return Err(ValidationError::MustBePositive("customer_sync_max_attempts"));
        }
        Ok(())
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            correlation_ttl_minutes: default_correlation_ttl(),
            ledger_retention_days: default_ledger_retention(),
            conflict_retry_limit: default_conflict_retry_limit(),
            retention_sweep_interval_secs: default_sweep_interval(),
            customer_sync_max_attempts: default_sync_attempts(),
        }
    }
}

fn default_correlation_ttl() -> i64 {
    DEFAULT_CORRELATION_TTL_MINUTES
}

fn default_ledger_retention() -> i64 {
    DEFAULT_LEDGER_RETENTION_DAYS
}

fn default_conflict_retry_limit() -> u32 {
    DEFAULT_CONFLICT_RETRY_LIMIT
}

fn default_sweep_interval() -> u64 {
    3600
}

fn default_sync_attempts() -> u32 {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_defaults() {
        let config = BillingConfig::default();
        assert_eq!(config.correlation_ttl(), chrono::Duration::minutes(30));
        assert_eq!(config.ledger_retention(), chrono::Duration::days(30));
        assert_eq!(config.conflict_retry_limit, 5);
        assert_eq!(config.retention_sweep_interval(), StdDuration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retry_limit_is_rejected() {
        let config = BillingConfig {
            conflict_retry_limit: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MustBePositive("conflict_retry_limit"))
        );
    }

    #[test]
    fn test_negative_ttl_is_rejected() {
        let config = BillingConfig {
            correlation_ttl_minutes: -1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
