//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks)
//!     → GovernorConfig (validated, immutable)
//!     → governance::Governance builds limiters and breakers from it
//! ```
//!
//! # Design Decisions
//! - Loaded once at startup; there is no runtime reconfiguration
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_config_str, ConfigError};
pub use schema::{
    CircuitBreakerConfig, CircuitBreakersConfig, CleanupConfig, Downstream, GovernorConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, RateLimitConfig, RateLimitsConfig,
    RetryConfig, TrafficClass,
};
pub use validation::{validate_config, ValidationError};
