//! Domain layer containing business logic and domain types.
//!
//! - `foundation` - Shared primitives (ids, time, errors, state machine)
//! - `billing` - Subscription lifecycle, reconciliation and quota
pub mod billing;
pub mod foundation;
