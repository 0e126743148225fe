//! Error taxonomy for outbound HTTP, feed parsing, and signing.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),

    #[error("invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error("malformed XML body: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unsupported signature algorithm for HMAC key length")]
    InvalidKeyLength,
}
