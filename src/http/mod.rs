//! HTTP integration subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → security::rate_limit (caller identity, traffic-class limiter)
//!     → server.rs handlers (status, limits, health)
//!     → response.rs (governance failures → 429 / 503 / 502)
//! ```

pub mod response;
pub mod server;

pub use response::GovernanceError;
pub use server::{protect, AppState, HttpServer};
