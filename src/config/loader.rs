//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GovernorConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GovernorConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    load_config_str(&content)
}

/// Parse and validate configuration from TOML text.
pub fn load_config_str(content: &str) -> Result<GovernorConfig, ConfigError> {
    let config: GovernorConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogFormat;

    #[test]
    fn empty_file_yields_defaults() {
        let config = load_config_str("").unwrap();
        assert_eq!(config.rate_limits.auth.max_requests, 5);
        assert_eq!(config.retries.max_attempts, 3);
    }

    #[test]
    fn partial_sections_override_defaults() {
        let config = load_config_str(
            r#"
            [rate_limits.diagnosis]
            max_requests = 2
            window_ms = 10000
            block_ms = 60000
            max_violations = 1

            [circuit_breakers.inference]
            max_failures = 2
            cooldown_ms = 1000

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limits.diagnosis.max_requests, 2);
        assert_eq!(config.rate_limits.diagnosis.max_violations, 1);
        assert_eq!(config.circuit_breakers.inference.max_failures, 2);
        assert_eq!(config.circuit_breakers.database.max_failures, 5);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = load_config_str(
            r#"
            [retries]
            base_delay_ms = 5000
            max_delay_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref e) if e.len() == 1));
        assert!(err.to_string().contains("exceeds max delay"));
    }

    #[test]
    fn shipped_sample_is_valid() {
        let config = load_config_str(include_str!("../../governor.toml")).unwrap();
        assert_eq!(config.rate_limits.auth.block_ms, 900_000);
        assert_eq!(config.listener.bind_address, "127.0.0.1:8080");
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = load_config_str("[rate_limits\nmax = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
