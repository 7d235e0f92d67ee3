//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-caller sliding window, progressive lockout)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - One limiter instance per traffic class, injected, never global
//! - Fail closed: unidentifiable callers share one budget

pub mod rate_limit;

pub use rate_limit::{
    caller_identity, rate_limit_middleware, scoped_key, CleanupReport, QuotaStatus, RateLimitGuard,
    RateLimiter,
};
