//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber
//! - Pick the filter from `RUST_LOG`, falling back to configuration
//!
//! # Design Decisions
//! - Uses the tracing crate for structured logging
//! - Human-readable fmt output; fields carry request id, template and
//!   generation so lines can be correlated

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Safe to call once per process; later
/// calls are ignored.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}
