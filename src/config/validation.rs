//! Configuration validation.
//!
//! Pure function over [`GovernorConfig`]; every problem is reported, not just
//! the first one found.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{Downstream, GovernorConfig, TrafficClass};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("{field}: base delay {base_ms}ms exceeds max delay {max_ms}ms")]
    DelayOrder {
        field: String,
        base_ms: u64,
        max_ms: u64,
    },

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: String, value: String },

    #[error("unknown log level '{0}'")]
    InvalidLogLevel(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GovernorConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_nonzero(&mut errors, "listener.request_timeout_secs", config.listener.request_timeout_secs);

    for class in TrafficClass::ALL {
        let rl = config.rate_limits.get(class);
        let prefix = format!("rate_limits.{class}");
        check_nonzero(&mut errors, &format!("{prefix}.max_requests"), rl.max_requests.into());
        check_nonzero(&mut errors, &format!("{prefix}.window_ms"), rl.window_ms);
        check_nonzero(&mut errors, &format!("{prefix}.block_ms"), rl.block_ms);
        check_nonzero(&mut errors, &format!("{prefix}.max_violations"), rl.max_violations.into());
    }

    for downstream in Downstream::ALL {
        let cb = config.circuit_breakers.get(downstream);
        let prefix = format!("circuit_breakers.{downstream}");
        check_nonzero(&mut errors, &format!("{prefix}.max_failures"), cb.max_failures.into());
        check_nonzero(&mut errors, &format!("{prefix}.cooldown_ms"), cb.cooldown_ms);
    }

    check_nonzero(&mut errors, "retries.max_delay_ms", config.retries.max_delay_ms);
    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            field: "retries".to_string(),
            base_ms: config.retries.base_delay_ms,
            max_ms: config.retries.max_delay_ms,
        });
    }

    check_nonzero(&mut errors, "cleanup.interval_secs", config.cleanup.interval_secs);

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(config.observability.log_level.clone()));
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero {
            field: field.to_string(),
        });
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GovernorConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_problem() {
        let mut config = GovernorConfig::default();
        config.rate_limits.auth.max_requests = 0;
        config.circuit_breakers.storage.cooldown_ms = 0;
        config.retries.base_delay_ms = 20_000;
        config.observability.log_level = "loud".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.contains(&ValidationError::Zero {
            field: "rate_limits.auth.max_requests".into()
        }));
        assert!(errors.contains(&ValidationError::Zero {
            field: "circuit_breakers.storage.cooldown_ms".into()
        }));
        assert!(errors.contains(&ValidationError::InvalidLogLevel("loud".into())));
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = GovernorConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::InvalidAddress { .. }));
    }
}
