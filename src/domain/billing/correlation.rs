//! Pending checkout correlation.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{CorrelationId, Timestamp, UserId};

/// Default lifetime of a pending correlation.
pub const DEFAULT_CORRELATION_TTL_MINUTES: i64 = 30;

/// Marker left when a user starts checkout, consumed by the matching
/// checkout-confirmed webhook.
///
/// At most one exists per user. Once `expires_at` has passed the entry is
/// inert and never matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCorrelation {
    pub id: CorrelationId,
    pub user_id: UserId,
    /// Price the user picked, used when the webhook carries none.
    pub price_id: Option<String>,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
}

impl PendingCorrelation {
    pub fn new(user_id: UserId, price_id: Option<String>, now: Timestamp, ttl: Duration) -> Self {
        Self {
            id: CorrelationId::new(),
            user_id,
            price_id,
            created_at: now,
            expires_at: now.plus(ttl),
        }
    }

    /// True while the correlation can still be matched.
    pub fn is_live_at(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_unix_secs(secs).unwrap()
    }

    #[test]
    fn expiry_is_creation_plus_ttl() {
        let c = PendingCorrelation::new(
            UserId::new("u1").unwrap(),
            None,
            ts(1_000),
            Duration::minutes(DEFAULT_CORRELATION_TTL_MINUTES),
        );
        assert_eq!(c.expires_at, ts(1_000 + 30 * 60));
    }

    #[test]
    fn live_until_expiry_instant() {
        let c = PendingCorrelation::new(
            UserId::new("u1").unwrap(),
            Some("price_x".into()),
            ts(0),
            Duration::seconds(60),
        );

        assert!(c.is_live_at(ts(59)));
        assert!(!c.is_live_at(ts(60)));
        assert!(!c.is_live_at(ts(3_600)));
    }
}
