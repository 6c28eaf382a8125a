//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, chunk sizes > 0)
//! - Check delimiter pairs are usable and unambiguous
//! - Check the database URL names a supported driver
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;
use crate::config::schema::ServerConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self { field, message: message.into() }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every violation.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }

    if config.templates.root.as_os_str().is_empty() {
        errors.push(ValidationError::new("templates.root", "must not be empty"));
    }

    let extension = &config.templates.extension;
    if extension.is_empty() || extension.contains('.') || extension.contains('/') {
        errors.push(ValidationError::new(
            "templates.extension",
            format!("`{}` must be a bare extension such as `html`", extension),
        ));
    }

    let pairs = config.templates.delimiters.pairs();
    for (label, start, end) in pairs {
        if start.is_empty() || end.is_empty() {
            errors.push(ValidationError::new(
                "templates.delimiters",
                format!("{} delimiters must not be empty", label),
            ));
        }
    }
    for (i, (label, start, _)) in pairs.iter().enumerate() {
        for (other, other_start, _) in &pairs[i + 1..] {
            if start == other_start {
                errors.push(ValidationError::new(
                    "templates.delimiters",
                    format!("{} and {} delimiters both start with `{}`", label, other, start),
                ));
            }
        }
    }

    if config.render.stream_chunk_bytes == 0 {
        errors.push(ValidationError::new("render.stream_chunk_bytes", "must be greater than 0"));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if let Some(database) = &config.database {
        if !database.url.starts_with("sqlite:") {
            errors.push(ValidationError::new(
                "database.url",
                format!("unsupported driver in `{}` (expected `sqlite:<path>`)", database.url),
            ));
        }
        if database.max_connections == 0 {
            errors.push(ValidationError::new("database.max_connections", "must be greater than 0"));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::DatabaseConfig;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ServerConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.templates.extension = ".html".into();
        config.render.stream_chunk_bytes = 0;
        config.admin.enabled = true;
        config.database = Some(DatabaseConfig {
            url: "postgres://localhost/app".into(),
            ..DatabaseConfig::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "templates.extension",
                "render.stream_chunk_bytes",
                "database.url",
                "admin.api_key",
            ]
        );
    }

    #[test]
    fn test_ambiguous_delimiters_rejected() {
        let mut config = ServerConfig::default();
        config.templates.delimiters.block_start = "{{".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("block and variable"));
    }
}
