//! Order execution.
//!
//! [`ExecutionEngine`] is the facade the strategy layer calls. An execution
//! attempt is one portfolio transaction: validate, take a rate-limiter
//! permit, reserve cash, call the broker through the circuit breaker, then
//! commit the fill or roll everything back.

mod engine;
mod validation;

pub use engine::ExecutionEngine;
pub use validation::{OrderLimits, validate_intent};
