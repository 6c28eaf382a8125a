//! Hot-reloading template application server library.

pub mod admin;
pub mod config;
pub mod funcs;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod query;
pub mod reload;
pub mod routing;
pub mod templates;

pub use config::schema::ServerConfig;
pub use http::HttpServer;
pub use lifecycle::{App, Shutdown};
