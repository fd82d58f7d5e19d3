//! Billing Reconciler - subscription state from payment-provider webhooks.
//!
//! Verifies and de-duplicates provider notifications, correlates completed
//! checkouts with the users who started them, reconciles out-of-order events
//! into one current subscription per user, and gates usage against the plan
//! quota of that subscription.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
