//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the billing domain and storage or provider APIs. Adapters implement them.
//!
//! - `IdempotencyLedger` - applied provider event ids
//! - `SubscriptionStore` - per-user accounts with optimistic versioning
//! - `CorrelationStore` - pending checkout correlations
//! - `CustomerSync` - provider customer metadata write-back

mod correlation_store;
mod customer_sync;
mod idempotency_ledger;
mod subscription_store;

pub use correlation_store::CorrelationStore;
pub use customer_sync::{CustomerSync, SyncError};
pub use idempotency_ledger::{AppliedEvent, IdempotencyLedger, LedgerOutcome};
pub use subscription_store::{SaveOutcome, SubscriptionStore, UsageOutcome};
