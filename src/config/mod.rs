//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + CLI overrides
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; template changes reload, config changes restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::ServerConfig;
pub use schema::ListenerConfig;
pub use schema::TemplateConfig;
pub use schema::DelimiterConfig;
pub use schema::ReloadConfig;
pub use schema::RenderConfig;
pub use schema::OutputMode;
pub use schema::DatabaseConfig;
pub use schema::AdminConfig;
