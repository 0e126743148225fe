//! Pool sizing for the embedded backend, built on `hub_sql_common::pool::Pool`.

use std::time::Duration;

use hub_sql_common::pool::DatabaseConfig;

/// `sqlite://<path>` or `sqlite::memory:`.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: String,
    pub max_size: usize,
    pub timeout: Duration,
}

impl SqliteConfig {
    pub fn new(url: &str) -> Self {
        let path = url
            .strip_prefix("sqlite://")
            .or_else(|| url.strip_prefix("sqlite:"))
            .unwrap_or(url)
            .to_owned();
        let is_memory = path.contains(":memory:") || path.is_empty();

        Self {
            path,
            // SQLite is single-writer: an in-memory database is private to
            // one connection, so pooling more than one would silently
            // serve queries against separate, empty databases.
            max_size: if is_memory { 1 } else { 10 },
            timeout: Duration::from_secs(30),
        }
    }

    pub fn is_memory(&self) -> bool {
        self.path.contains(":memory:") || self.path.is_empty()
    }
}

impl DatabaseConfig for SqliteConfig {
    fn max_size(&self) -> usize {
        self.max_size
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}
