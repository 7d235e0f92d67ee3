//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a downstream:
//!     → circuit_breaker.rs (fail fast while open, single probe while half-open)
//!     → retries.rs (re-invoke with backoff.rs delays until success or exhaustion)
//!     → operation
//! ```
//!
//! # Design Decisions
//! - One breaker per downstream category, constructed at startup
//! - Retries sit inside the breaker so an exhausted retry counts as one failure
//! - Neither component imposes a deadline on the wrapped operation

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerError, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use retries::{with_retry, RetryExecutor, RetryPolicy};
