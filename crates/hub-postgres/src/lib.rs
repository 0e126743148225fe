//! Durable PostgreSQL backend for the WebSub hub [`Store`].
//!
//! Unlike the embedded SQLite backend, Postgres gives us real row-level
//! locking, so the shared `hub_sql_common::store` queries run unmodified
//! (`FOR UPDATE SKIP LOCKED` and all). [`listener`] additionally exposes
//! `LISTEN`/`NOTIFY` based content-change notification, which SQLite
//! (single process, no peers) has no use for.

mod db;
pub mod error;
pub mod listener;
pub mod migrations;
mod value;

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use db::{pg_batch, pg_execute, pg_fetch_all, pg_fetch_one, pg_pluck};
use hub_common::database::Error;
use hub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use hub_sql_common::pool::{DatabaseConfig, DatabasePool, Pool};
use hub_sql_common::stmt::{query, Column, Statement};
use hub_sql_common::store::Store;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_postgres::{connect, Client, Error as PgError, NoTls};

pub use error::PostgresBackendError;

/// A [`Store`] backed by PostgreSQL.
pub type PostgresStore = Store<PgConnectionPool>;

/// Connects to `conn_str` (a libpq connection string), applies any
/// outstanding migrations, and returns a ready-to-use [`PostgresStore`].
pub async fn connect_store(conn_str: &str) -> Result<PostgresStore, Error> {
    let config = PgConfig::from(conn_str);
    let pool = Pool::<PgConnectionPool>::new(config);

    {
        let conn = pool
            .get()
            .map_err(|e| Error::Internal(format!("failed to open postgres connection: {e}")))?;
        migrations::run(&*conn).await?;
    }

    Ok(Store::new(pool))
}

/// Postgres connection configuration. Only `NoTls` is supported; TLS is
/// expected to be terminated by the operator's connection string/proxy,
/// the way most self-hosted deployments of this shape run.
#[derive(Clone, Debug)]
pub struct PgConfig {
    url: String,
}

impl From<&str> for PgConfig {
    fn from(conn_str: &str) -> Self {
        Self {
            url: conn_str.to_owned(),
        }
    }
}

impl DatabaseConfig for PgConfig {
    fn max_size(&self) -> usize {
        20
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Resource manager plugged into `hub_sql_common::pool::Pool<PgConnectionPool>`.
#[derive(Debug)]
pub struct PgConnectionPool;

impl DatabasePool for PgConnectionPool {
    type Connection = PostgresConnection;
    type Config = PgConfig;
    type Error = PgError;

    fn new_resource(
        config: &Self::Config,
        stale: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self::Connection, hub_sql_common::pool::Error<Self::Error>> {
        Ok(PostgresConnection::new(config.clone(), timeout, stale))
    }
}

/// A lazily-established postgres connection. Connecting happens on a
/// background task so `new_resource` (a synchronous call) can return
/// immediately; the first caller to use the connection awaits the
/// `Notify` that fires once the handshake finishes or fails.
#[derive(Debug)]
pub struct PostgresConnection {
    timeout: Duration,
    error: Arc<Mutex<Option<Error>>>,
    client: Arc<OnceLock<Client>>,
    notify: Arc<Notify>,
}

impl PostgresConnection {
    fn new(config: PgConfig, timeout: Duration, stale: Arc<AtomicBool>) -> Self {
        let error = Arc::new(Mutex::new(None));
        let client = Arc::new(OnceLock::new());
        let notify = Arc::new(Notify::new());

        let error_clone = error.clone();
        let client_clone = client.clone();
        let notify_clone = notify.clone();

        tokio::spawn(async move {
            match connect(&config.url, NoTls).await {
                Ok((new_client, connection)) => {
                    let stale_for_spawn = stale.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection.await {
                            tracing::warn!(%err, "postgres connection task exited");
                        }
                        stale_for_spawn.store(true, Ordering::Release);
                    });

                    let _ = client_clone.set(new_client);
                }
                Err(err) => {
                    *error_clone.lock().await = Some(Error::Database(Box::new(err)));
                    stale.store(true, Ordering::Release);
                }
            }
            notify_clone.notify_waiters();
        });

        Self {
            timeout,
            error,
            client,
            notify,
        }
    }

    async fn inner(&self) -> Result<&Client, Error> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        if let Some(err) = self.error.lock().await.take() {
            return Err(err);
        }
        if timeout(self.timeout, self.notify.notified()).await.is_err() {
            return Err(Error::Internal(
                "timed out establishing postgres connection".to_owned(),
            ));
        }
        if let Some(client) = self.client.get() {
            Ok(client)
        } else if let Some(err) = self.error.lock().await.take() {
            Err(err)
        } else {
            Err(Error::Internal("postgres connection failed".to_owned()))
        }
    }
}

macro_rules! impl_executor {
    ($ty:ty) => {
        #[async_trait]
        impl DatabaseExecutor for $ty {
            fn name() -> &'static str {
                "postgres"
            }

            async fn execute(&self, statement: Statement) -> Result<usize, Error> {
                pg_execute(self.inner().await?, statement).await
            }

            async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error> {
                pg_fetch_one(self.inner().await?, statement).await
            }

            async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error> {
                pg_fetch_all(self.inner().await?, statement).await
            }

            async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error> {
                pg_pluck(self.inner().await?, statement).await
            }

            async fn batch(&self, statement: Statement) -> Result<(), Error> {
                pg_batch(self.inner().await?, statement).await
            }
        }
    };
}

impl_executor!(PostgresConnection);

/// A transaction on a postgres connection. Rather than borrowing
/// `tokio_postgres::Transaction<'a>` (which needs `&mut Client`, awkward
/// behind the shared `inner()` accessor above), this issues `BEGIN`/
/// `COMMIT`/`ROLLBACK` directly on the same session, which is valid
/// because the pool hands out exclusive connection checkouts, so no other
/// task can interleave statements.
#[derive(Debug)]
pub struct PgTransaction {
    client: Arc<OnceLock<Client>>,
    timeout: Duration,
    error: Arc<Mutex<Option<Error>>>,
    notify: Arc<Notify>,
}

impl PgTransaction {
    async fn inner(&self) -> Result<&Client, Error> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        if let Some(err) = self.error.lock().await.take() {
            return Err(err);
        }
        if timeout(self.timeout, self.notify.notified()).await.is_err() {
            return Err(Error::Internal(
                "timed out establishing postgres connection".to_owned(),
            ));
        }
        self.client
            .get()
            .ok_or_else(|| Error::Internal("postgres connection failed".to_owned()))
    }
}

impl_executor!(PgTransaction);

#[async_trait]
impl DatabaseTransaction<'_> for PgTransaction {
    async fn commit(self) -> Result<(), Error> {
        query("COMMIT")?.batch(self.inner().await?).await
    }

    async fn rollback(self) -> Result<(), Error> {
        query("ROLLBACK")?.batch(self.inner().await?).await
    }
}

#[async_trait]
impl DatabaseConnector for PostgresConnection {
    type Transaction<'a> = PgTransaction;

    async fn begin(&self) -> Result<Self::Transaction<'_>, Error> {
        query("BEGIN")?.batch(self.inner().await?).await?;
        Ok(PgTransaction {
            client: self.client.clone(),
            timeout: self.timeout,
            error: self.error.clone(),
            notify: self.notify.clone(),
        })
    }
}

#[cfg(all(test, feature = "integration-test"))]
mod test {
    use super::*;

    async fn provide_store(test_id: String) -> PostgresStore {
        let base = std::env::var("HUB_TEST_POSTGRES_URL")
            .unwrap_or_else(|_| "host=localhost user=postgres password=postgres dbname=postgres port=5432".to_owned());
        let conn_str = format!("{base} options='-c search_path={test_id}'");
        connect_store(&conn_str).await.expect("database")
    }

    async fn fresh_store() -> PostgresStore {
        provide_store(format!("hub_test_{}", uuid::Uuid::new_v4().simple())).await
    }

    hub_sql_common::store_test!(fresh_store);
}
