//! Foundation module - Shared domain primitives.
//!
//! Identifiers, time, error types and the state machine trait that the
//! billing domain is written in terms of.

mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{CorrelationId, UserId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
