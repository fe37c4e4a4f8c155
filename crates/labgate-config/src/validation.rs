//! Configuration validation

use crate::schema::{RawConfig, RawControllerConfig, RawServiceConfig};
use thiserror::Error;

/// Longest accepted controller timeout
pub const MAX_REQUEST_TIMEOUT_MS: u64 = 600_000;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid controller URL '{url}': {message}")]
    InvalidControllerUrl { url: String, message: String },

    #[error("request_timeout_ms must be between 1 and {max}, got {value}")]
    InvalidTimeout { value: u64, max: u64 },

    #[error("Path for '{field}' cannot be empty")]
    EmptyPath { field: &'static str },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    errors.extend(validate_service(&config.service));
    errors.extend(validate_controller(&config.controller));
    errors
}

fn validate_service(service: &RawServiceConfig) -> Vec<ValidationError> {
    let fields = [
        ("socket_path", &service.socket_path),
        ("data_dir", &service.data_dir),
        ("roster_path", &service.roster_path),
        ("export_path", &service.export_path),
    ];

    fields
        .into_iter()
        .filter(|(_, path)| path.as_ref().is_some_and(|p| p.as_os_str().is_empty()))
        .map(|(field, _)| ValidationError::EmptyPath { field })
        .collect()
}

fn validate_controller(controller: &RawControllerConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(url) = &controller.url {
        if let Err(message) = check_url(url) {
            errors.push(ValidationError::InvalidControllerUrl {
                url: url.clone(),
                message,
            });
        }
    }

    if let Some(ms) = controller.request_timeout_ms {
        if ms == 0 || ms > MAX_REQUEST_TIMEOUT_MS {
            errors.push(ValidationError::InvalidTimeout {
                value: ms,
                max: MAX_REQUEST_TIMEOUT_MS,
            });
        }
    }

    errors
}

fn check_url(url: &str) -> Result<(), String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| "scheme must be http or https".to_string())?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() {
        return Err("missing host".into());
    }
    if host.chars().any(char::is_whitespace) {
        return Err("host contains whitespace".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn raw() -> RawConfig {
        RawConfig {
            config_version: 1,
            service: RawServiceConfig::default(),
            controller: RawControllerConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&raw()).is_empty());
    }

    #[test]
    fn reject_bad_url_and_timeout_together() {
        let mut config = raw();
        config.controller.url = Some("ftp://controller".into());
        config.controller.request_timeout_ms = Some(0);

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], ValidationError::InvalidControllerUrl { .. }));
        assert!(matches!(errors[1], ValidationError::InvalidTimeout { value: 0, .. }));
    }

    #[test]
    fn reject_missing_host() {
        let mut config = raw();
        config.controller.url = Some("http:///wm".into());
        assert_eq!(validate_config(&config).len(), 1);
    }

    #[test]
    fn reject_empty_paths() {
        let mut config = raw();
        config.service.roster_path = Some(PathBuf::new());
        assert_eq!(
            validate_config(&config),
            vec![ValidationError::EmptyPath { field: "roster_path" }]
        );
    }
}
