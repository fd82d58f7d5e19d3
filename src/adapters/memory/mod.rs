//! In-memory adapters for tests and single-process deployments.

mod correlation_store;
mod ledger;
mod subscription_store;

pub use correlation_store::InMemoryCorrelationStore;
pub use ledger::InMemoryLedger;
pub use subscription_store::InMemorySubscriptionStore;
