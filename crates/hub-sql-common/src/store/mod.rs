//! The hub's persistence layer.
//!
//! `Store<RM>` is generic over any backend implementing [`DatabasePool`]; the
//! claim/completion SQL below is written once, against
//! [`crate::database::DatabaseExecutor`], and shared by `hub-sqlite` and
//! `hub-postgres`.

pub mod history;
pub mod migrations;
pub mod subscription;
#[cfg(feature = "test-utils")]
pub mod test;
pub mod topic;
pub mod verification;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hub_common::database::{ConversionError, Error};
use url::Url;
use uuid::Uuid;

use crate::pool::{DatabasePool, Pool, PooledResource};
use crate::stmt::Column;

/// Converts a UNIX-timestamp integer column into a UTC instant.
pub(crate) fn parse_datetime(col: Column) -> Result<DateTime<Utc>, Error> {
    let secs: i64 = column_as_number!(col);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| {
        ConversionError::InvalidConversion(secs.to_string(), "DateTime<Utc>".to_owned()).into()
    })
}

/// Converts a nullable UNIX-timestamp integer column into an optional UTC
/// instant. `+∞`/`-∞` sentinels are stored as `NULL` here;
/// callers that need "never" vs "immediately" compare against `now`
/// instead.
pub(crate) fn parse_datetime_opt(col: Column) -> Result<Option<DateTime<Utc>>, Error> {
    match col {
        Column::Null => Ok(None),
        other => parse_datetime(other).map(Some),
    }
}

pub(crate) fn parse_uuid(col: Column) -> Result<Uuid, Error> {
    let text = column_as_string!(col);
    Uuid::parse_str(&text)
        .map_err(ConversionError::from)
        .map_err(Error::from)
}

pub(crate) fn parse_url(col: Column) -> Result<Url, Error> {
    let text = column_as_string!(col);
    Url::parse(&text)
        .map_err(ConversionError::from)
        .map_err(Error::from)
}

pub(crate) fn parse_url_opt(col: Column) -> Result<Option<Url>, Error> {
    match col {
        Column::Null => Ok(None),
        other => parse_url(other).map(Some),
    }
}

/// One of the three claim queues (topic fetch, verification, delivery).
/// Kept mostly for documentation and for `Worker`'s round-robin refiller;
/// the claim SQL itself is not generically dispatched over this enum
/// because each queue's
/// "needed" view and claim key shape differ (a single `topic_id` versus the
/// `(topic_id, callback)` pair used by verification).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    TopicFetch,
    SubscriptionDelivery,
    Verification,
}

/// The hub's persistence layer.
#[derive(Debug)]
pub struct Store<RM>
where
    RM: DatabasePool,
{
    pool: Arc<Pool<RM>>,
}

impl<RM> Clone for Store<RM>
where
    RM: DatabasePool,
{
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<RM> Store<RM>
where
    RM: DatabasePool,
{
    pub fn new(pool: Arc<Pool<RM>>) -> Self {
        Self { pool }
    }

    /// Checks out a pooled connection, mapping pool exhaustion/poisoning
    /// into the same error type the rest of the Store surface uses.
    pub(crate) fn conn(&self) -> Result<PooledResource<RM>, Error> {
        self.pool
            .get()
            .map_err(|e| Error::Internal(format!("failed to check out a connection: {e}")))
    }
}
