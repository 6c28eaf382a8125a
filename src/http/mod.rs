//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, body limit)
//!     → dispatcher.rs (route lookup, context, render)
//!     → buffered body or chunked stream
//!     → Send to client
//! ```

pub mod dispatcher;
pub mod server;

pub use dispatcher::{Dispatcher, RenderRequest};
pub use server::{AppState, HttpServer};

/// Header carrying the per-request correlation id.
pub const X_REQUEST_ID: &str = "x-request-id";
