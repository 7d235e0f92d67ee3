//! Request governance: sliding-window rate limiting, circuit breaking and
//! retry with backoff for the calls a service makes on behalf of its callers.

pub mod clock;
pub mod config;
pub mod governance;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::GovernorConfig;
pub use governance::Governance;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
