//! Embedded single-file SQLite backend for the WebSub hub [`Store`].
//!
//! SQLite is single-writer; the `hub_sql_common` queries shared with
//! `hub-postgres` carry a `FOR UPDATE SKIP LOCKED` clause meant for a
//! backend with real row-level locking. `connector::rewrite_for_sqlite`
//! strips it, so this backend trades away cross-transaction parallelism
//! for correctness but needs no separate query set.

pub mod config;
pub mod connector;
pub mod error;
pub mod migrations;

use hub_common::database::Error;
use hub_sql_common::pool::Pool;
use hub_sql_common::store::Store;

pub use config::SqliteConfig;
pub use connector::{SqliteConnection, SqliteManager};

/// A [`Store`] backed by a single SQLite file (or an in-memory database).
pub type SqliteStore = Store<SqliteManager>;

/// Opens (creating if needed) the database at `url`, applies any
/// outstanding migrations, and returns a ready-to-use [`SqliteStore`].
///
/// `url` is `sqlite://<path>` or `sqlite::memory:`.
pub async fn connect(url: &str) -> Result<SqliteStore, Error> {
    let config = SqliteConfig::new(url);
    let pool = Pool::<SqliteManager>::new(config);

    {
        let conn = pool
            .get()
            .map_err(|e| Error::Internal(format!("failed to open sqlite database: {e}")))?;
        migrations::run(&*conn).await?;
    }

    Ok(Store::new(pool))
}

/// An in-memory database with the schema applied, for tests.
pub async fn memory() -> Result<SqliteStore, Error> {
    connect("sqlite::memory:").await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn migrates_and_is_queryable() {
        let store = memory().await.expect("memory store");
        let url = url::Url::parse("https://publisher.example/feed").expect("url");
        let topic = store.create_topic(&url).await.expect("create topic");
        assert_eq!(topic.url, url);

        let fetched = store
            .get_topic_by_url(&url)
            .await
            .expect("query")
            .expect("present");
        assert_eq!(fetched.id, topic.id);
    }

    async fn fresh_store() -> Store<SqliteManager> {
        memory().await.expect("memory store")
    }

    hub_sql_common::store_test!(fresh_store);
}
