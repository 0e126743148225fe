//! Applies the bundled `migrations/1.0.0/` SQL assets.
//!
//! Each version directory is compiled in via `include_str!` and applied in
//! one `batch` call inside its own transaction, in ascending order between
//! the database's current version and [`hub_sql_common::store::migrations::CURRENT`].

use hub_common::database::Error;
use hub_sql_common::database::{DatabaseConnector, DatabaseExecutor, DatabaseTransaction};
use hub_sql_common::stmt::query;
use hub_sql_common::store::migrations::{
    check_supported_range, current_version, record_version, SchemaVersion, CURRENT, MIN_SUPPORTED,
};

/// One bundled migration: its target version and the `up.sql` to apply.
struct Migration {
    version: SchemaVersion,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: SchemaVersion::new(1, 0, 0),
    up: include_str!("../migrations/1.0.0/up.sql"),
}];

/// Applies any migrations newer than the database's current version, then
/// verifies the result lies within `[MIN_SUPPORTED, CURRENT]`. Fails
/// fatally if the stored version is outside that range even
/// after applying every bundled migration.
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
            tracing::info!(version = %migration.version, "applied sqlite migration");
            applied = Some(migration.version);
        }
    }

    let current = applied.unwrap_or(SchemaVersion::new(0, 0, 0));
    check_supported_range(current, MIN_SUPPORTED, CURRENT)
}

async fn ensure_version_table<C: DatabaseExecutor>(conn: &C) -> Result<(), Error> {
    query(
        "CREATE TABLE IF NOT EXISTS _meta_schema_version ( \
           major INTEGER NOT NULL, minor INTEGER NOT NULL, patch INTEGER NOT NULL, \
           applied INTEGER NOT NULL, PRIMARY KEY (major, minor, patch))",
    )?
    .batch(conn)
    .await
}
