//! Maps `rusqlite` failures onto the shared database error taxonomy,
//! distinguishing the `SQLITE_CONSTRAINT_*` cases the store layer cares
//! about from everything else.

use hub_common::database::Error;
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};

/// Backend-local error, kept distinct from [`Error`] so
/// [`hub_sql_common::pool::DatabasePool::Error`] has a concrete,
/// `std::error::Error`-implementing type to name.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct SqliteBackendError(#[from] pub rusqlite::Error);

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ffi_err, _) = &err {
            if matches!(
                ffi_err.extended_code,
                SQLITE_CONSTRAINT_UNIQUE | SQLITE_CONSTRAINT_PRIMARYKEY
            ) {
                return Error::Duplicate;
            }
        }
        Error::Database(Box::new(err))
    }
}

impl From<SqliteBackendError> for Error {
    fn from(err: SqliteBackendError) -> Self {
        err.0.into()
    }
}
