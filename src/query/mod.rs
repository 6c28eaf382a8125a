//! Query bridge subsystem.
//!
//! # Data Flow
//! ```text
//! Template: db.query(sql, args...) / db.query_row(...) / db.exec(...)
//!     → bridge.rs (template values → Scalar parameters)
//!     → DataSource (driver-native parameter binding)
//!     → sqlite.rs (pooled connection, interruptible statement)
//!     → Records → template values
//! ```
//!
//! # Design Decisions
//! - The data source is a trait; SQLite is the shipped driver
//! - Statements run on the render thread and honor the request's
//!   cancellation token
//! - Results are ordered records of dynamically-typed scalars

pub mod bridge;
pub mod sqlite;

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseConfig;

pub use bridge::QueryBridge;

/// A dynamically-typed column or parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Integer(i) => serializer.serialize_i64(*i),
            Scalar::Real(f) => serializer.serialize_f64(*f),
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::Blob(b) => serializer.serialize_bytes(b),
        }
    }
}

/// One result row: column name → value, in column order.
pub type Record = IndexMap<String, Scalar>;

/// Data source failures.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("unsupported database url `{0}` (expected `sqlite:<path>`)")]
    UnsupportedUrl(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("query_row: no rows in result set")]
    NoRows,

    #[error("query_row: expected one row, got {0} or more")]
    TooManyRows(usize),

    #[error("query cancelled")]
    Cancelled,

    #[error("unsupported query argument {position}: {kind}")]
    UnsupportedArgument { position: usize, kind: String },

    #[error("connection pool poisoned")]
    Poisoned,
}

/// A relational data source reachable from templates.
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Run a query, returning at most `limit` records when set.
    fn query(
        &self,
        sql: &str,
        args: &[Scalar],
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, QueryError>;

    /// Run a statement, returning the affected-row count.
    fn exec(&self, sql: &str, args: &[Scalar], cancel: &CancellationToken) -> Result<u64, QueryError>;
}

/// Open the data source named by a connection string.
pub fn connect(config: &DatabaseConfig) -> Result<Arc<dyn DataSource>, QueryError> {
    let source = sqlite::SqlitePool::open(config)?;
    Ok(Arc::new(source))
}
