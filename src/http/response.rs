//! Governance failures as HTTP responses.
//!
//! # Mapping
//! - Rate limited → 429 with `Retry-After`, `X-RateLimit-Limit`, `X-RateLimit-Remaining: 0`
//! - Circuit open → 503 with `Retry-After` when the cooldown is known
//! - Downstream failure → 502
//!
//! Bodies are small JSON objects: `{"error": ..., "message": ...}` plus a
//! `retry_after_secs` field when one applies.

use std::fmt::Display;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::resilience::BreakerError;
use crate::security::rate_limit::{X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING};

/// Request-level governance failure.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Rate limit exceeded for {class}")]
    RateLimited {
        class: String,
        limit: u32,
        retry_after: Duration,
    },

    #[error("Circuit breaker '{breaker}' is open")]
    CircuitOpen {
        breaker: String,
        retry_in: Option<Duration>,
    },

    #[error("Upstream failure: {0}")]
    Upstream(String),
}

impl GovernanceError {
    pub fn status(&self) -> StatusCode {
        match self {
            GovernanceError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GovernanceError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GovernanceError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            GovernanceError::RateLimited { .. } => "rate_limited",
            GovernanceError::CircuitOpen { .. } => "circuit_open",
            GovernanceError::Upstream(_) => "upstream_failure",
        }
    }

    /// Seconds for the `Retry-After` header, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            GovernanceError::RateLimited { retry_after, .. } => Some(ceil_secs(*retry_after)),
            GovernanceError::CircuitOpen { retry_in, .. } => retry_in.map(ceil_secs),
            GovernanceError::Upstream(_) => None,
        }
    }
}

/// Whole seconds, rounded up, never below one.
fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

impl<E: Display> From<BreakerError<E>> for GovernanceError {
    fn from(err: BreakerError<E>) -> Self {
        match err {
            BreakerError::Open { breaker, retry_in } => GovernanceError::CircuitOpen { breaker, retry_in },
            BreakerError::Inner(e) => GovernanceError::Upstream(e.to_string()),
        }
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        let retry_after = self.retry_after_secs();
        let mut body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        if let Some(secs) = retry_after {
            body["retry_after_secs"] = json!(secs);
        }

        let mut response = (self.status(), Json(body)).into_response();
        let headers = response.headers_mut();
        if let Some(secs) = retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if let GovernanceError::RateLimited { limit, .. } = &self {
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(*limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
        }
        response
    }
}
