//! Maps `tokio_postgres` failures onto the shared database error taxonomy.

use hub_common::database::Error;
use tokio_postgres::error::SqlState;
use tokio_postgres::Error as PgError;

/// Backend-local error, kept distinct from [`Error`] so
/// [`hub_sql_common::pool::DatabasePool::Error`] has a concrete,
/// `std::error::Error`-implementing type to name.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct PostgresBackendError(#[from] pub PgError);

pub(crate) fn to_postgres_error(err: PgError) -> Error {
    if let Some(db_error) = err.as_db_error() {
        let code = db_error.code();
        if *code == SqlState::UNIQUE_VIOLATION || *code == SqlState::INTEGRITY_CONSTRAINT_VIOLATION
        {
            return Error::Duplicate;
        }
    }
    Error::Database(Box::new(err))
}

impl From<PostgresBackendError> for Error {
    fn from(err: PostgresBackendError) -> Self {
        to_postgres_error(err.0)
    }
}
