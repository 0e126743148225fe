//! Schema version bookkeeping.
//!
//! Applying the actual `up.sql`/`down.sql` files is left to each backend
//! crate, since only it knows its own migrations directory layout and SQL
//! dialect (see `hub-sqlite::migrations`, `hub-postgres::migrations`). This
//! module only owns the `_meta_schema_version` bookkeeping both backends
//! share.

use std::fmt;
use std::str::FromStr;

use hub_common::database::{ConversionError, Error};

use crate::database::DatabaseExecutor;
use crate::stmt::query;

/// A `major.minor.patch` schema version, recorded one row per applied
/// migration in `_meta_schema_version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl SchemaVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for SchemaVersion {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '.');
        let err = || ConversionError::InvalidConversion(s.to_owned(), "SchemaVersion".to_owned());
        let major = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let minor = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        let patch = parts.next().ok_or_else(err)?.parse().map_err(|_| err())?;
        Ok(Self {
            major,
            minor,
            patch,
        })
    }
}

/// The inclusive `[min, max]` schema range this build of the hub supports
///. Bump `CURRENT` whenever a migration is added under
/// `hub-sqlite`/`hub-postgres`'s `migrations/<backend>/<version>/`.
pub const MIN_SUPPORTED: SchemaVersion = SchemaVersion::new(1, 0, 0);
pub const CURRENT: SchemaVersion = SchemaVersion::new(1, 0, 0);

/// Reads the most recently applied schema version, or `None` if
/// `_meta_schema_version` has never been populated (a brand-new database).
pub async fn current_version<C: DatabaseExecutor>(
    conn: &C,
) -> Result<Option<SchemaVersion>, Error> {
    let row = query(
        "SELECT major, minor, patch FROM _meta_schema_version \
         ORDER BY major DESC, minor DESC, patch DESC LIMIT 1",
    )?
    .fetch_one(conn)
    .await?;

    row.map(|row| {
        unpack_into!(let (major, minor, patch) = row);
        Ok::<_, Error>(SchemaVersion {
            major: column_as_number!(major),
            minor: column_as_number!(minor),
            patch: column_as_number!(patch),
        })
    })
    .transpose()
}

/// Records that `version` has been applied.
pub async fn record_version<C: DatabaseExecutor>(
    conn: &C,
    version: SchemaVersion,
) -> Result<(), Error> {
    query(
        "INSERT INTO _meta_schema_version (major, minor, patch, applied) \
         VALUES (:major, :minor, :patch, :applied)",
    )?
    .bind("major", version.major as i64)
    .bind("minor", version.minor as i64)
    .bind("patch", version.patch as i64)
    .bind("applied", chrono::Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Verifies the currently applied version lies within `[min, max]`,
/// failing fatally otherwise.
pub fn check_supported_range(
    current: SchemaVersion,
    min: SchemaVersion,
    max: SchemaVersion,
) -> Result<(), Error> {
    if current < min || current > max {
        return Err(Error::MigrationNeeded {
            current: current.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays() {
        let v: SchemaVersion = "1.2.3".parse().expect("parses");
        assert_eq!(v, SchemaVersion::new(1, 2, 3));
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn rejects_out_of_range() {
        let current = SchemaVersion::new(0, 9, 0);
        let err = check_supported_range(current, SchemaVersion::new(1, 0, 0), CURRENT);
        assert!(err.is_err());
    }
}
