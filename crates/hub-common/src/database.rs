//! Shared database error taxonomy: one opaque, transparent variant per
//! backend driver, plus the handful of domain errors every `Store`
//! implementation can raise regardless of backend.

/// Errors raised by the SQL plumbing (`hub-sql-common`) and by backend
/// crates (`hub-sqlite`, `hub-postgres`).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Opaque error from the underlying database driver.
    #[error(transparent)]
    Database(Box<dyn std::error::Error + Send + Sync>),

    /// A unique-constraint violation surfaced by the driver.
    #[error("Duplicate row")]
    Duplicate,

    /// A query bound fewer placeholders than the statement required.
    #[error("Missing placeholder: {0}")]
    MissingPlaceholder(String),

    /// A column could not be converted to the requested Rust type.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The executor replied with a response shape the caller did not expect.
    #[error("Unexpected database response")]
    InvalidDbResponse,

    /// A completion operation affected a number of rows other than the one
    /// expected.
    #[error("Expected to affect {expected} row(s), affected {actual}")]
    UnexpectedRowCount { expected: u64, actual: u64 },

    /// The current schema version is outside the supported `[min, max]`
    /// range; startup must fail fatally.
    #[error("Schema version {current} is outside supported range [{min}, {max}]")]
    MigrationNeeded {
        current: String,
        min: String,
        max: String,
    },

    /// Catch-all for invariant violations local to this crate family.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while converting a raw SQL column into a domain type.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Fewer columns were returned than the row parser expected.
    #[error("Expected at least {0} columns, got {1}")]
    MissingColumn(usize, usize),
    /// A column held a SQL type the parser did not expect.
    #[error("Expected column of type {0}, got {1}")]
    InvalidType(String, String),
    /// A column's textual/numeric representation did not parse.
    #[error("Could not convert {0} into {1}")]
    InvalidConversion(String, String),
    /// A stored value (e.g. an enum-backed string) was not recognized.
    #[error("Unknown value for {0}: {1}")]
    UnknownValue(String, String),
    /// Propagated serde error, e.g. for JSON-encoded columns.
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    /// Propagated URL parse error.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Propagated UUID parse error.
    #[error(transparent)]
    Uuid(#[from] uuid::Error),
}

impl From<ConversionError> for Error {
    fn from(value: ConversionError) -> Self {
        Error::Conversion(value)
    }
}
