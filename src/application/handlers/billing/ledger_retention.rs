//! LedgerRetention - periodic sweep of old ledger entries and expired
//! checkout correlations.

use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::domain::foundation::{DomainError, Timestamp};
use crate::ports::{CorrelationStore, IdempotencyLedger};

/// Default age after which applied event ids are forgotten.
pub const DEFAULT_LEDGER_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub ledger_entries_pruned: u64,
    pub correlations_purged: u64,
}

pub struct LedgerRetention {
    ledger: Arc<dyn IdempotencyLedger>,
    correlations: Arc<dyn CorrelationStore>,
    retention: Duration,
}

impl LedgerRetention {
    pub fn new(ledger: Arc<dyn IdempotencyLedger>, correlations: Arc<dyn CorrelationStore>) -> Self {
        Self {
            ledger,
            correlations,
            retention: Duration::days(DEFAULT_LEDGER_RETENTION_DAYS),
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub async fn run_once(&self, now: Timestamp) -> Result<RetentionReport, DomainError> {
        let cutoff = now.minus(self.retention);
        Ok(RetentionReport {
            ledger_entries_pruned: self.ledger.prune_before(cutoff).await?,
            correlations_purged: self.correlations.purge_expired(now).await?,
        })
    }

    /// Runs the sweep every `every` until the runtime shuts down.
    pub fn spawn(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match self.run_once(Timestamp::now()).await {
                    Ok(report) => tracing::info!(
                        ledger_entries_pruned = report.ledger_entries_pruned,
                        correlations_purged = report.correlations_purged,
                        "Retention sweep complete"
                    ),
                    Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
                }
            }
        })
    }
}
