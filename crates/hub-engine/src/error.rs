//! Error taxonomy for the engines and the manager boundary.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Caller-supplied input failed validation; surfaced as `400` by the
    /// dispatcher.
    #[error("validation failed: {0}")]
    DataValidation(String),

    /// A referenced entity does not exist; surfaced as `404`.
    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Database(#[from] hub_common::database::Error),

    #[error(transparent)]
    Http(#[from] hub_http::Error),
}
