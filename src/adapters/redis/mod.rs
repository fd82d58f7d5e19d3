//! Redis adapters.
//!
//! - `RedisLedger` - Shared idempotency ledger with TTL-based retention

mod ledger;

pub use ledger::RedisLedger;
