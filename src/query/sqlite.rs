//! SQLite data source with a bounded connection pool.
//!
//! # Responsibilities
//! - Parse `sqlite:<path>` / `sqlite::memory:` connection strings
//! - Hand out at most `max_connections` connections, blocking when exhausted
//! - Bind parameters natively and convert rows to records
//! - Interrupt a running statement when the request is cancelled
//!
//! # Design Decisions
//! - An in-memory database lives in a single connection, so the pool is
//!   capped at one and that connection is opened eagerly and never closed
//! - File databases open one connection eagerly to fail fast on bad paths

use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tokio_util::sync::CancellationToken;

use crate::config::DatabaseConfig;
use crate::query::{DataSource, QueryError, Record, Scalar};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Memory,
    File(PathBuf),
}

impl Target {
    fn parse(url: &str) -> Result<Self, QueryError> {
        let rest = url
            .strip_prefix("sqlite:")
            .ok_or_else(|| QueryError::UnsupportedUrl(url.to_string()))?;
        let rest = rest.strip_prefix("//").unwrap_or(rest);
        match rest {
            "" => Err(QueryError::UnsupportedUrl(url.to_string())),
            ":memory:" => Ok(Target::Memory),
            path => Ok(Target::File(PathBuf::from(path))),
        }
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Scalar::Null => ToSqlOutput::Owned(SqlValue::Null),
            Scalar::Integer(i) => ToSqlOutput::from(*i),
            Scalar::Real(f) => ToSqlOutput::from(*f),
            Scalar::Text(s) => ToSqlOutput::from(s.as_str()),
            Scalar::Blob(b) => ToSqlOutput::from(b.as_slice()),
        })
    }
}

impl From<ValueRef<'_>> for Scalar {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Scalar::Null,
            ValueRef::Integer(i) => Scalar::Integer(i),
            ValueRef::Real(f) => Scalar::Real(f),
            ValueRef::Text(t) => Scalar::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Scalar::Blob(b.to_vec()),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

/// Pooled SQLite connections.
#[derive(Debug)]
pub struct SqlitePool {
    target: Target,
    busy_timeout: Duration,
    capacity: usize,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl SqlitePool {
    pub fn open(config: &DatabaseConfig) -> Result<Self, QueryError> {
        let target = Target::parse(&config.url)?;
        let capacity = match target {
            Target::Memory => 1,
            Target::File(_) => config.max_connections.max(1),
        };

        let pool = Self {
            target,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            capacity,
            state: Mutex::new(PoolState::default()),
            available: Condvar::new(),
        };

        let first = pool.connect()?;
        {
            let mut state = pool.state.lock().map_err(|_| QueryError::Poisoned)?;
            state.idle.push(first);
            state.open = 1;
        }

        tracing::info!(
            target = ?pool.target,
            capacity = pool.capacity,
            "SQLite pool opened"
        );
        Ok(pool)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn connect(&self) -> Result<Connection, QueryError> {
        let conn = match &self.target {
            Target::Memory => Connection::open_in_memory()?,
            Target::File(path) => Connection::open(path)?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn checkout(&self) -> Result<PooledConnection<'_>, QueryError> {
        let mut state = self.state.lock().map_err(|_| QueryError::Poisoned)?;
        loop {
            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection { pool: self, conn: Some(conn) });
            }
            if state.open < self.capacity {
                state.open += 1;
                drop(state);
                return match self.connect() {
                    Ok(conn) => Ok(PooledConnection { pool: self, conn: Some(conn) }),
                    Err(e) => {
                        if let Ok(mut state) = self.state.lock() {
                            state.open -= 1;
                        }
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }
            state = self.available.wait(state).map_err(|_| QueryError::Poisoned)?;
        }
    }

    fn checkin(&self, conn: Connection) {
        if let Ok(mut state) = self.state.lock() {
            state.idle.push(conn);
        }
        self.available.notify_one();
    }

    /// Run `f` on a pooled connection, interrupting it if `cancel` fires.
    fn with_connection<T>(
        &self,
        cancel: &CancellationToken,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, QueryError> {
        if cancel.is_cancelled() {
            return Err(QueryError::Cancelled);
        }

        let pooled = self.checkout()?;
        let conn = pooled.connection()?;

        let watcher = tokio::runtime::Handle::try_current().ok().map(|runtime| {
            let interrupt = conn.get_interrupt_handle();
            let token = cancel.clone();
            runtime.spawn(async move {
                token.cancelled().await;
                interrupt.interrupt();
            })
        });

        let result = f(conn);

        if let Some(watcher) = watcher {
            watcher.abort();
        }

        result.map_err(|e| {
            if cancel.is_cancelled() {
                QueryError::Cancelled
            } else {
                QueryError::Sqlite(e)
            }
        })
    }
}

struct PooledConnection<'a> {
    pool: &'a SqlitePool,
    conn: Option<Connection>,
}

impl PooledConnection<'_> {
    fn connection(&self) -> Result<&Connection, QueryError> {
        self.conn.as_ref().ok_or(QueryError::Poisoned)
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.checkin(conn);
        }
    }
}

impl DataSource for SqlitePool {
    fn query(
        &self,
        sql: &str,
        args: &[Scalar],
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Record>, QueryError> {
        self.with_connection(cancel, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
            let mut rows = stmt.query(params_from_iter(args.iter()))?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                let mut record = Record::with_capacity(names.len());
                for (i, name) in names.iter().enumerate() {
                    record.insert(name.clone(), Scalar::from(row.get_ref(i)?));
                }
                records.push(record);
                if limit.is_some_and(|limit| records.len() >= limit) {
                    break;
                }
            }
            Ok(records)
        })
    }

    fn exec(&self, sql: &str, args: &[Scalar], cancel: &CancellationToken) -> Result<u64, QueryError> {
        self.with_connection(cancel, |conn| {
            let mut stmt = conn.prepare_cached(sql)?;
            let affected = stmt.execute(params_from_iter(args.iter()))?;
            Ok(affected as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            max_connections: 4,
            busy_timeout_ms: 1_000,
        }
    }

    #[test]
    fn test_parse_urls() {
        assert_eq!(Target::parse("sqlite::memory:").unwrap(), Target::Memory);
        assert_eq!(Target::parse("sqlite:app.db").unwrap(), Target::File(PathBuf::from("app.db")));
        assert_eq!(Target::parse("sqlite:///tmp/a.db").unwrap(), Target::File(PathBuf::from("/tmp/a.db")));
        assert!(Target::parse("postgres://x").is_err());
        assert!(Target::parse("sqlite:").is_err());
    }

    #[test]
    fn test_memory_pool_is_single_connection() {
        let pool = SqlitePool::open(&config("sqlite::memory:")).unwrap();
        assert_eq!(pool.capacity(), 1);

        let cancel = CancellationToken::new();
        pool.exec("CREATE TABLE t (id INTEGER, name TEXT)", &[], &cancel).unwrap();
        pool.exec("INSERT INTO t VALUES (?1, ?2)", &[Scalar::Integer(1), Scalar::Text("a".into())], &cancel)
            .unwrap();

        let rows = pool.query("SELECT id, name FROM t", &[], None, &cancel).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Scalar::Text("a".into()));
    }

    #[test]
    fn test_file_pool_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("app.db").display());
        let pool = SqlitePool::open(&config(&url)).unwrap();
        let cancel = CancellationToken::new();

        pool.exec("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, score REAL, raw BLOB)", &[], &cancel)
            .unwrap();
        let inserted = pool
            .exec(
                "INSERT INTO notes (body, score, raw) VALUES (?1, ?2, ?3), (?4, NULL, NULL)",
                &[
                    Scalar::Text("first".into()),
                    Scalar::Real(1.5),
                    Scalar::Blob(vec![1, 2]),
                    Scalar::Text("second".into()),
                ],
                &cancel,
            )
            .unwrap();
        assert_eq!(inserted, 2);

        let rows = pool.query("SELECT id, body, score, raw FROM notes ORDER BY id", &[], None, &cancel).unwrap();
        let columns: Vec<_> = rows[0].keys().cloned().collect();
        assert_eq!(columns, vec!["id", "body", "score", "raw"]);
        assert_eq!(rows[0]["score"], Scalar::Real(1.5));
        assert_eq!(rows[0]["raw"], Scalar::Blob(vec![1, 2]));
        assert_eq!(rows[1]["score"], Scalar::Null);

        let limited = pool.query("SELECT id FROM notes", &[], Some(1), &cancel).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_concurrent_checkout_respects_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("pool.db").display());
        let mut cfg = config(&url);
        cfg.max_connections = 2;
        let pool = Arc::new(SqlitePool::open(&cfg).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    pool.query("SELECT 1 AS one", &[], None, &CancellationToken::new()).unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap()[0]["one"], Scalar::Integer(1));
        }

        let state = pool.state.lock().unwrap();
        assert!(state.open <= 2);
    }

    #[test]
    fn test_cancelled_before_start() {
        let pool = SqlitePool::open(&config("sqlite::memory:")).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = pool.query("SELECT 1", &[], None, &cancel).unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_interrupts_running_statement() {
        let pool = Arc::new(SqlitePool::open(&config("sqlite::memory:")).unwrap());
        let cancel = CancellationToken::new();

        let task = {
            let pool = pool.clone();
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                pool.query(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT count(*) FROM c",
                    &[],
                    None,
                    &cancel,
                )
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(matches!(result, Err(QueryError::Cancelled)));
    }
}
