//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the governor.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GovernorConfig {
    /// HTTP listener for the status surface.
    pub listener: ListenerConfig,

    /// One sliding-window limiter per traffic class.
    pub rate_limits: RateLimitsConfig,

    /// One breaker per downstream category.
    pub circuit_breakers: CircuitBreakersConfig,

    /// Default retry policy.
    pub retries: RetryConfig,

    /// Background sweep of limiter state.
    pub cleanup: CleanupConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Per-request timeout for the status endpoints, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Parameters of a single sliding-window limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Admitted calls per window.
    pub max_requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Lockout length once blocked, in milliseconds.
    pub block_ms: u64,

    /// Over-limit hits before a block triggers.
    pub max_violations: u32,
}

impl RateLimitConfig {
    pub const fn new(max_requests: u32, window_ms: u64, block_ms: u64, max_violations: u32) -> Self {
        Self {
            max_requests,
            window_ms,
            block_ms,
            max_violations,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, 60_000, 300_000, 5)
    }
}

/// Per-traffic-class limiter parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// General API traffic.
    pub api: RateLimitConfig,

    /// Sign-in, sign-up and password reset.
    pub auth: RateLimitConfig,

    /// File uploads.
    pub upload: RateLimitConfig,

    /// Administrative endpoints.
    pub admin: RateLimitConfig,

    /// AI diagnosis submissions.
    pub diagnosis: RateLimitConfig,
}

impl RateLimitsConfig {
    pub fn get(&self, class: TrafficClass) -> &RateLimitConfig {
        match class {
            TrafficClass::Api => &self.api,
            TrafficClass::Auth => &self.auth,
            TrafficClass::Upload => &self.upload,
            TrafficClass::Admin => &self.admin,
            TrafficClass::Diagnosis => &self.diagnosis,
        }
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            api: RateLimitConfig::new(100, 60_000, 300_000, 5),
            auth: RateLimitConfig::new(5, 60_000, 900_000, 3),
            upload: RateLimitConfig::new(10, 60_000, 600_000, 3),
            admin: RateLimitConfig::new(50, 60_000, 300_000, 5),
            diagnosis: RateLimitConfig::new(5, 60_000, 600_000, 3),
        }
    }
}

/// Parameters of a single circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening.
    pub max_failures: u32,

    /// How long to stay open before admitting a probe, in milliseconds.
    pub cooldown_ms: u64,
}

impl CircuitBreakerConfig {
    pub const fn new(max_failures: u32, cooldown_ms: u64) -> Self {
        Self {
            max_failures,
            cooldown_ms,
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, 60_000)
    }
}

/// Per-downstream breaker parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakersConfig {
    /// Third-party inference API.
    pub inference: CircuitBreakerConfig,

    /// Managed relational store.
    pub database: CircuitBreakerConfig,

    /// Managed object storage.
    pub storage: CircuitBreakerConfig,
}

impl CircuitBreakersConfig {
    pub fn get(&self, downstream: Downstream) -> &CircuitBreakerConfig {
        match downstream {
            Downstream::Inference => &self.inference,
            Downstream::Database => &self.database,
            Downstream::Storage => &self.storage,
        }
    }
}

impl Default for CircuitBreakersConfig {
    fn default() -> Self {
        Self {
            inference: CircuitBreakerConfig::new(5, 60_000),
            database: CircuitBreakerConfig::new(5, 30_000),
            storage: CircuitBreakerConfig::new(3, 30_000),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
        }
    }
}

/// Limiter cleanup sweep.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Sweep interval in seconds.
    pub interval_secs: u64,
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Traffic classes with independent limiter instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    Api,
    Auth,
    Upload,
    Admin,
    Diagnosis,
}

impl TrafficClass {
    pub const ALL: [TrafficClass; 5] = [
        TrafficClass::Api,
        TrafficClass::Auth,
        TrafficClass::Upload,
        TrafficClass::Admin,
        TrafficClass::Diagnosis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::Api => "api",
            TrafficClass::Auth => "auth",
            TrafficClass::Upload => "upload",
            TrafficClass::Admin => "admin",
            TrafficClass::Diagnosis => "diagnosis",
        }
    }
}

impl fmt::Display for TrafficClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrafficClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TrafficClass::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown traffic class: {s}"))
    }
}

/// Downstream operation categories guarded by a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Downstream {
    Inference,
    Database,
    Storage,
}

impl Downstream {
    pub const ALL: [Downstream; 3] = [Downstream::Inference, Downstream::Database, Downstream::Storage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Downstream::Inference => "inference",
            Downstream::Database => "database",
            Downstream::Storage => "storage",
        }
    }
}

impl fmt::Display for Downstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traffic_class_round_trips_through_str() {
        for class in TrafficClass::ALL {
            assert_eq!(class.as_str().parse::<TrafficClass>().unwrap(), class);
        }
        assert_eq!("AUTH".parse::<TrafficClass>().unwrap(), TrafficClass::Auth);
        assert!("billing".parse::<TrafficClass>().is_err());
    }

    #[test]
    fn classes_have_independent_defaults() {
        let limits = RateLimitsConfig::default();
        assert_eq!(limits.get(TrafficClass::Auth).max_requests, 5);
        assert_eq!(limits.get(TrafficClass::Auth).block_ms, 900_000);
        assert_eq!(limits.get(TrafficClass::Api).max_requests, 100);
    }

    #[test]
    fn durations_follow_millis() {
        let rl = RateLimitConfig::new(5, 60_000, 900_000, 3);
        assert_eq!(rl.window(), Duration::from_secs(60));
        assert_eq!(rl.block_duration(), Duration::from_secs(900));
        assert_eq!(CircuitBreakerConfig::new(2, 1_000).cooldown(), Duration::from_secs(1));
    }
}
