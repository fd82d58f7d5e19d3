//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the billing domain to external systems:
//! - `memory` - In-process stores for tests and single-instance runs
//! - `postgres` - sqlx-backed store, ledger and correlations
//! - `redis` - Shared idempotency ledger
//! - `stripe` - Customer metadata write-back
//! - `http` - Axum routes

pub mod http;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod stripe;
