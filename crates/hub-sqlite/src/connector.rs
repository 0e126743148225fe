//! `DatabaseExecutor`/`DatabaseConnector` over a single blocking
//! `rusqlite::Connection`.
//!
//! This crate takes the simple route of one `rusqlite::Connection` per
//! pooled resource, each query running through `tokio::task::spawn_blocking`.
//! SQLite is single-writer regardless, and `hub_sql_common::pool::Pool`
//! already serializes checkouts, so there's no concurrency to gain from
//! juggling several connections behind one logical pooled resource.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hub_common::database::Error;
use hub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use hub_sql_common::pool::{self, DatabaseConfig, DatabasePool};
use hub_sql_common::stmt::Statement;
use hub_sql_common::value::Value;

use crate::config::SqliteConfig;
use crate::error::SqliteBackendError;

fn to_rusqlite_value(value: Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Integer(i) => rusqlite::types::Value::Integer(i),
        Value::Real(f) => rusqlite::types::Value::Real(f),
        Value::Text(s) => rusqlite::types::Value::Text(s),
        Value::Blob(b) => rusqlite::types::Value::Blob(b),
    }
}

fn from_rusqlite_value(value: rusqlite::types::Value) -> Value {
    match value {
        rusqlite::types::Value::Null => Value::Null,
        rusqlite::types::Value::Integer(i) => Value::Integer(i),
        rusqlite::types::Value::Real(f) => Value::Real(f),
        rusqlite::types::Value::Text(s) => Value::Text(s),
        rusqlite::types::Value::Blob(b) => Value::Blob(b),
    }
}

fn row_to_columns(row: &rusqlite::Row) -> rusqlite::Result<Vec<Value>> {
    let count = row.as_ref().column_count();
    (0..count)
        .map(|i| row.get::<_, rusqlite::types::Value>(i).map(from_rusqlite_value))
        .collect()
}

/// Rewrites `$1..$n` placeholders (how [`Statement::to_sql`] renders them)
/// into rusqlite's `?1..?n`, and strips the trailing `FOR UPDATE [SKIP
/// LOCKED]` clause a shared query may carry for the postgres backend.
/// SQLite achieves the same mutual exclusion by serializing writers.
fn rewrite_for_sqlite(sql: &str) -> String {
    let sql = sql.replace('$', "?");
    let trimmed = sql.trim_end();
    let trimmed = trimmed
        .strip_suffix("FOR UPDATE SKIP LOCKED")
        .or_else(|| trimmed.strip_suffix("FOR UPDATE"))
        .unwrap_or(trimmed);
    trimmed.trim_end().to_owned()
}

async fn run_blocking<F, T>(inner: Arc<Mutex<rusqlite::Connection>>, f: F) -> Result<T, Error>
where
    F: FnOnce(&rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let conn = inner.lock().expect("sqlite connection mutex poisoned");
        f(&conn)
    })
    .await
    .map_err(|e| Error::Internal(format!("sqlite worker thread panicked: {e}")))?
    .map_err(Error::from)
}

/// A checked-out SQLite connection.
#[derive(Debug)]
pub struct SqliteConnection {
    inner: Arc<Mutex<rusqlite::Connection>>,
}

/// A transaction over the same underlying connection. Holds the pooled
/// resource for its whole lifetime, so no other task can interleave
/// statements.
#[derive(Debug)]
pub struct SqliteTransaction {
    inner: Arc<Mutex<rusqlite::Connection>>,
}

macro_rules! impl_executor {
    ($ty:ty) => {
        #[async_trait]
        impl DatabaseExecutor for $ty {
            fn name() -> &'static str {
                "sqlite"
            }

            async fn execute(&self, statement: Statement) -> Result<usize, Error> {
                let (sql, values) = statement.to_sql()?;
                let sql = rewrite_for_sqlite(&sql);
                let inner = self.inner.clone();
                run_blocking(inner, move |conn| {
                    let params = values
                        .into_iter()
                        .map(to_rusqlite_value)
                        .collect::<Vec<_>>();
                    conn.execute(&sql, rusqlite::params_from_iter(params))
                })
                .await
            }

            async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Value>>, Error> {
                let rows = self.fetch_all(statement).await?;
                Ok(rows.into_iter().next())
            }

            async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Value>>, Error> {
                let (sql, values) = statement.to_sql()?;
                let sql = rewrite_for_sqlite(&sql);
                let inner = self.inner.clone();
                run_blocking(inner, move |conn| {
                    let params = values
                        .into_iter()
                        .map(to_rusqlite_value)
                        .collect::<Vec<_>>();
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(rusqlite::params_from_iter(params), row_to_columns)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                })
                .await
            }

            async fn pluck(&self, statement: Statement) -> Result<Option<Value>, Error> {
                let row = self.fetch_one(statement).await?;
                Ok(row.and_then(|mut columns| {
                    if columns.is_empty() {
                        None
                    } else {
                        Some(columns.remove(0))
                    }
                }))
            }

            async fn batch(&self, statement: Statement) -> Result<(), Error> {
                let (sql, _values) = statement.to_sql()?;
                let inner = self.inner.clone();
                run_blocking(inner, move |conn| conn.execute_batch(&sql)).await
            }
        }
    };
}

impl_executor!(SqliteConnection);
impl_executor!(SqliteTransaction);

#[async_trait]
impl DatabaseTransaction<'_> for SqliteTransaction {
    async fn commit(self) -> Result<(), Error> {
        run_blocking(self.inner, |conn| conn.execute_batch("COMMIT")).await
    }

    async fn rollback(self) -> Result<(), Error> {
        run_blocking(self.inner, |conn| conn.execute_batch("ROLLBACK")).await
    }
}

#[async_trait]
impl DatabaseConnector for SqliteConnection {
    type Transaction<'a> = SqliteTransaction;

    async fn begin(&self) -> Result<Self::Transaction<'_>, Error> {
        let inner = self.inner.clone();
        run_blocking(inner.clone(), |conn| conn.execute_batch("BEGIN IMMEDIATE")).await?;
        Ok(SqliteTransaction { inner })
    }
}

/// Resource manager plugged into `hub_sql_common::pool::Pool<SqliteManager>`.
#[derive(Debug, Clone, Copy)]
pub struct SqliteManager;

impl DatabasePool for SqliteManager {
    type Connection = SqliteConnection;
    type Config = SqliteConfig;
    type Error = SqliteBackendError;

    fn new_resource(
        config: &SqliteConfig,
        _stale: Arc<AtomicBool>,
        _timeout: Duration,
    ) -> Result<SqliteConnection, pool::Error<SqliteBackendError>> {
        let open = |config: &SqliteConfig| -> rusqlite::Result<rusqlite::Connection> {
            let conn = if config.is_memory() {
                rusqlite::Connection::open_in_memory()?
            } else {
                rusqlite::Connection::open(&config.path)?
            };

            conn.pragma_update(None, "busy_timeout", 5000i64)?;
            if !config.is_memory() {
                conn.pragma_update(None, "journal_mode", "wal")?;
            }
            conn.pragma_update(None, "synchronous", "normal")?;
            conn.pragma_update(None, "foreign_keys", true)?;
            Ok(conn)
        };

        let conn = open(config).map_err(|e| pool::Error::Resource(SqliteBackendError(e)))?;
        Ok(SqliteConnection {
            inner: Arc::new(Mutex::new(conn)),
        })
    }
}
