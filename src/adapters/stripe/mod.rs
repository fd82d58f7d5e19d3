//! Stripe adapters.
//!
//! Outbound only: webhook verification is pure domain code. This module
//! writes the local user id back onto the Stripe customer.
//!
//! # Security
//!
//! - The API key is held as `secrecy::SecretString` and only exposed for
//!   the basic-auth header.

mod customer_sync;

pub use customer_sync::{BackoffConfig, NoopCustomerSync, StripeCustomerSync, STRIPE_API_BASE_URL};
