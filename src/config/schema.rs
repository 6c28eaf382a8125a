//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

/// Root configuration for the template server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, body limits).
    pub listener: ListenerConfig,

    /// Template source tree and syntax.
    pub templates: TemplateConfig,

    /// Hot reload behavior.
    pub reload: ReloadConfig,

    /// Output strategy for rendered responses.
    pub render: RenderConfig,

    /// Optional data source exposed to templates as `db`.
    pub database: Option<DatabaseConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Host metadata exposed to every template as `meta`.
    pub context: toml::Table,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Largest request body read into the template context.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Template source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Root directory scanned for template files.
    pub root: PathBuf,

    /// Extension (without the dot) that marks a file as a template.
    pub extension: String,

    /// Delimiters of the template syntax.
    pub delimiters: DelimiterConfig,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("templates"),
            extension: "html".to_string(),
            delimiters: DelimiterConfig::default(),
        }
    }
}

/// Delimiter pairs of the template syntax.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct DelimiterConfig {
    pub block_start: String,
    pub block_end: String,
    pub variable_start: String,
    pub variable_end: String,
    pub comment_start: String,
    pub comment_end: String,
}

impl Default for DelimiterConfig {
    fn default() -> Self {
        Self {
            block_start: "{%".to_string(),
            block_end: "%}".to_string(),
            variable_start: "{{".to_string(),
            variable_end: "}}".to_string(),
            comment_start: "{#".to_string(),
            comment_end: "#}".to_string(),
        }
    }
}

impl DelimiterConfig {
    /// All pairs as (label, start, end).
    pub fn pairs(&self) -> [(&'static str, &str, &str); 3] {
        [
            ("block", &self.block_start, &self.block_end),
            ("variable", &self.variable_start, &self.variable_end),
            ("comment", &self.comment_start, &self.comment_end),
        ]
    }
}

/// Hot reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    /// Watch the template root for changes.
    pub watch: bool,

    /// Quiet period after a change before rebuilding, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            watch: true,
            debounce_ms: 50,
        }
    }
}

/// How rendered output reaches the client.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Render the whole body before committing a status.
    #[default]
    Buffered,
    /// Flush chunks while rendering; late errors truncate the body.
    Streaming,
}

/// Render configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RenderConfig {
    pub output: OutputMode,

    /// Chunk size used in streaming mode.
    pub stream_chunk_bytes: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            output: OutputMode::Buffered,
            stream_chunk_bytes: 8 * 1024,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Driver-qualified connection string, e.g. `sqlite:app.db`.
    pub url: String,

    /// Upper bound on open connections.
    pub max_connections: usize,

    /// How long a statement waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub log_filter: String,

    /// Expose a Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Address of the Prometheus endpoint.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "template_server=info,tower_http=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub api_key: String,
}
