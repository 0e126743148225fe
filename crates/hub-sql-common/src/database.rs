//! Database connector traits.
//!
//! The same three traits are implemented once by each concrete backend
//! (`hub-sqlite::SqliteConnection`, `hub-postgres::PostgresConnection`) so
//! that `store/` can be written exactly once against `DatabaseExecutor`.

use std::fmt::Debug;

use hub_common::database::Error;

use crate::stmt::{Column, Statement};

/// Anything capable of running a [`Statement`] and returning its result.
#[async_trait::async_trait]
pub trait DatabaseExecutor: Debug + Sync + Send {
    /// Driver name, used only for diagnostics.
    fn name() -> &'static str;

    /// Executes a query and returns the number of affected rows.
    async fn execute(&self, statement: Statement) -> Result<usize, Error>;

    /// Runs the query and returns the first row, or `None`.
    async fn fetch_one(&self, statement: Statement) -> Result<Option<Vec<Column>>, Error>;

    /// Runs the query and returns every matching row.
    async fn fetch_all(&self, statement: Statement) -> Result<Vec<Vec<Column>>, Error>;

    /// Runs the query and returns the first column of the first row.
    async fn pluck(&self, statement: Statement) -> Result<Option<Column>, Error>;

    /// Runs a batch of semicolon-separated statements with no bound
    /// placeholders (used for schema migrations).
    async fn batch(&self, statement: Statement) -> Result<(), Error>;
}

/// A transaction: a [`DatabaseExecutor`] that can be committed or rolled
/// back.
#[async_trait::async_trait]
pub trait DatabaseTransaction<'a>: Debug + DatabaseExecutor + Send + Sync {
    /// Commits the changes made within this transaction.
    async fn commit(self) -> Result<(), Error>;

    /// Discards the changes made within this transaction.
    async fn rollback(self) -> Result<(), Error>;
}

/// A pooled connection capable of starting transactions.
#[async_trait::async_trait]
pub trait DatabaseConnector: Debug + DatabaseExecutor + Send + Sync {
    /// This connector's transaction type.
    type Transaction<'a>: DatabaseTransaction<'a>
    where
        Self: 'a;

    /// Starts a new transaction.
    async fn begin(&self) -> Result<Self::Transaction<'_>, Error>;
}
