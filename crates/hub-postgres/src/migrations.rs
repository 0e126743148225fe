//! Applies the bundled `migrations/1.0.0/` SQL assets, the
//! postgres counterpart of `hub_sqlite::migrations`. Kept as separate
//! bundled SQL (rather than shared with sqlite) because this version also
//! installs the `LISTEN`/`NOTIFY` trigger used for content-cache invalidation.

use hub_common::database::Error;
use hub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use hub_sql_common::stmt::query;
use hub_sql_common::store::migrations::{
    check_supported_range, current_version, record_version, SchemaVersion, CURRENT, MIN_SUPPORTED,
};

struct Migration {
    version: SchemaVersion,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: SchemaVersion::new(1, 0, 0),
    up: include_str!("../migrations/1.0.0/up.sql"),
}];

pub async fn run<C>(conn: &C) -> Result<(), Error>
where
    C: DatabaseConnector,
{
    ensure_version_table(conn).await?;
    let mut applied = current_version(conn).await?;

    for migration in MIGRATIONS {
        let needs_apply = match applied {
            Some(v) => v < migration.version,
            None => true,
        };
        if needs_apply {
            let tx = conn.begin().await?;
            query(migration.up)?.batch(&tx).await?;
            record_version(&tx, migration.version).await?;
            tx.commit().await?;
            tracing::info!(version = %migration.version, "applied postgres migration");
            applied = Some(migration.version);
        }
    }

    let current = applied.unwrap_or(SchemaVersion::new(0, 0, 0));
    check_supported_range(current, MIN_SUPPORTED, CURRENT)
}

async fn ensure_version_table<C: DatabaseExecutor>(conn: &C) -> Result<(), Error> {
    query(
        "CREATE TABLE IF NOT EXISTS _meta_schema_version ( \
           major BIGINT NOT NULL, minor BIGINT NOT NULL, patch BIGINT NOT NULL, \
           applied BIGINT NOT NULL, PRIMARY KEY (major, minor, patch))",
    )?
    .batch(conn)
    .await
}
