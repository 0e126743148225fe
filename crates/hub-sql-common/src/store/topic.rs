//! Topic persistence and the topic-fetch claim queue.

use chrono::Utc;
use hub_common::database::Error;
use hub_common::entities::{HashAlgorithm, Topic, TopicContentHistoryEntry, TopicId};
use hub_common::Backoff;
use url::Url;

use crate::database::DatabaseExecutor;
use crate::pool::DatabasePool;
use crate::stmt::query;

use super::{parse_datetime, parse_datetime_opt, parse_url, parse_url_opt, parse_uuid, Store};

fn topic_from_row(row: Vec<crate::stmt::Column>) -> Result<Topic, Error> {
    unpack_into!(let (
        id, url, created, lease_preferred, lease_min, lease_max, publisher_validation_url,
        content_hash_algorithm, is_active, is_deleted, last_publish, content_fetch_next_attempt,
        content_fetch_attempts_since_success, content_updated, content, content_hash,
        content_type, http_etag, http_last_modified
    ) = row);

    Ok(Topic {
        id: TopicId(parse_uuid(id)?),
        url: parse_url(url)?,
        created: parse_datetime(created)?,
        lease_seconds_preferred: match lease_preferred {
            crate::stmt::Column::Null => None,
            other => Some(column_as_number!(other)),
        },
        lease_seconds_min: match lease_min {
            crate::stmt::Column::Null => None,
            other => Some(column_as_number!(other)),
        },
        lease_seconds_max: match lease_max {
            crate::stmt::Column::Null => None,
            other => Some(column_as_number!(other)),
        },
        publisher_validation_url: parse_url_opt(publisher_validation_url)?,
        content_hash_algorithm: {
            let s = column_as_string!(content_hash_algorithm);
            s.parse::<HashAlgorithm>()?
        },
        is_active: column_as_number!(is_active),
        is_deleted: column_as_number!(is_deleted),
        last_publish: parse_datetime_opt(last_publish)?,
        content_fetch_next_attempt: parse_datetime_opt(content_fetch_next_attempt)?,
        content_fetch_attempts_since_success: column_as_number!(content_fetch_attempts_since_success),
        content_updated: parse_datetime_opt(content_updated)?,
        content: column_as_nullable_binary!(content),
        content_hash: column_as_nullable_string!(content_hash),
        content_type: column_as_nullable_string!(content_type),
        http_etag: column_as_nullable_string!(http_etag),
        http_last_modified: column_as_nullable_string!(http_last_modified),
    })
}

const TOPIC_COLUMNS: &str = "id, url, created, lease_seconds_preferred, lease_seconds_min, \
    lease_seconds_max, publisher_validation_url, content_hash_algorithm, is_active, is_deleted, \
    last_publish, content_fetch_next_attempt, content_fetch_attempts_since_success, \
    content_updated, content, content_hash, content_type, http_etag, http_last_modified";

/// Input to [`Store::topic_set_content`].
#[derive(Debug, Clone)]
pub struct TopicContentUpdate {
    pub topic_id: TopicId,
    pub content: Vec<u8>,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl<RM> Store<RM>
where
    RM: DatabasePool,
{
    pub async fn get_topic(&self, topic_id: TopicId) -> Result<Option<Topic>, Error> {
        let conn = self.conn()?;
        let row = query(&format!("SELECT {TOPIC_COLUMNS} FROM topic WHERE id = :id"))?
            .bind("id", topic_id.0.to_string())
            .fetch_one(&*conn)
            .await?;
        row.map(topic_from_row).transpose()
    }

    pub async fn get_topic_by_url(&self, url: &Url) -> Result<Option<Topic>, Error> {
        let conn = self.conn()?;
        let row = query(&format!("SELECT {TOPIC_COLUMNS} FROM topic WHERE url = :url"))?
            .bind("url", url.as_str())
            .fetch_one(&*conn)
            .await?;
        row.map(topic_from_row).transpose()
    }

    /// Creates a topic for a publish to an unknown URL when `publicHub` is
    /// enabled, or when an admin registers a feed up front. Mirrors
    /// `topicFetchRequested` by also setting `contentFetchNextAttempt =
    /// now` and `lastPublish = now` so the new row is immediately eligible
    /// for fetch.
    pub async fn create_topic(&self, url: &Url) -> Result<Topic, Error> {
        let conn = self.conn()?;
        let id = TopicId::new();
        let now = Utc::now();

        query(
            "INSERT INTO topic (id, url, created, content_hash_algorithm, is_active, is_deleted, \
             last_publish, content_fetch_next_attempt, content_fetch_attempts_since_success) \
             VALUES (:id, :url, :created, :algo, false, false, :now, :now, 0)",
        )?
        .bind("id", id.0.to_string())
        .bind("url", url.as_str())
        .bind("created", now)
        .bind("algo", HashAlgorithm::default().to_string())
        .bind("now", now)
        .execute(&*conn)
        .await?;

        self.get_topic(id)
            .await?
            .ok_or_else(|| Error::Internal("topic vanished immediately after insert".to_owned()))
    }

    /// Marks a topic eligible for an immediate fetch, e.g. on publish
    /// notification for an already-known topic.
    pub async fn topic_fetch_requested(&self, topic_id: TopicId) -> Result<(), Error> {
        let conn = self.conn()?;
        let now = Utc::now();
        let affected = query(
            "UPDATE topic SET content_fetch_next_attempt = :now, last_publish = :now \
             WHERE id = :id",
        )?
        .bind("now", now)
        .bind("id", topic_id.0.to_string())
        .execute(&*conn)
        .await?;

        if affected != 1 {
            return Err(Error::UnexpectedRowCount {
                expected: 1,
                actual: affected as u64,
            });
        }
        Ok(())
    }

    /// Batch-claims up to `wanted` topics eligible for fetch. Skips topics already locked by another
    /// transaction, so concurrent workers never double-claim.
    pub async fn claim_topic_fetch_batch(
        &self,
        wanted: i64,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<Vec<TopicId>, Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        let rows = query(
            "SELECT id FROM topic \
             WHERE is_deleted = false AND content_fetch_next_attempt <= :now \
               AND id NOT IN ( \
                 SELECT topic_id FROM topic_fetch_in_progress WHERE claim_expires >= :now \
               ) \
             ORDER BY last_publish ASC \
             LIMIT :wanted \
             FOR UPDATE SKIP LOCKED",
        )?
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            unpack_into!(let (id) = row);
            let topic_id = TopicId(parse_uuid(id)?);

            query(
                "INSERT INTO topic_fetch_in_progress (topic_id, claimant, claimed, claim_expires) \
                 VALUES (:topic_id, :claimant, :claimed, :expires) \
                 ON CONFLICT (topic_id) DO UPDATE SET \
                   claimant = excluded.claimant, claimed = excluded.claimed, \
                   claim_expires = excluded.claim_expires",
            )?
            .bind("topic_id", topic_id.0.to_string())
            .bind("claimant", claimant)
            .bind("claimed", now)
            .bind("expires", expires)
            .execute(&tx)
            .await?;

            claimed.push(topic_id);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Claims a single topic by id, e.g. for `processImmediately`. The
    /// overwrite is strict: an already-active claim by someone else wins.
    pub async fn claim_topic_fetch_by_id(
        &self,
        topic_id: TopicId,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<bool, Error> {
        let conn = self.conn()?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        let affected = query(
            "INSERT INTO topic_fetch_in_progress (topic_id, claimant, claimed, claim_expires) \
             VALUES (:topic_id, :claimant, :claimed, :expires) \
             ON CONFLICT (topic_id) DO UPDATE SET \
               claimant = excluded.claimant, claimed = excluded.claimed, \
               claim_expires = excluded.claim_expires \
             WHERE topic_fetch_in_progress.claim_expires < :now",
        )?
        .bind("topic_id", topic_id.0.to_string())
        .bind("claimant", claimant)
        .bind("claimed", now)
        .bind("expires", expires)
        .bind("now", now)
        .execute(&*conn)
        .await?;

        Ok(affected == 1)
    }

    pub async fn release_topic_fetch(&self, topic_id: TopicId) -> Result<(), Error> {
        let conn = self.conn()?;
        query("DELETE FROM topic_fetch_in_progress WHERE topic_id = :id")?
            .bind("id", topic_id.0.to_string())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Resets the fetch-retry counters and releases the claim.
    pub async fn topic_fetch_complete(&self, topic_id: TopicId) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        query(
            "UPDATE topic SET content_fetch_attempts_since_success = 0, \
             content_fetch_next_attempt = NULL WHERE id = :id",
        )?
        .bind("id", topic_id.0.to_string())
        .execute(&tx)
        .await?;

        query("DELETE FROM topic_fetch_in_progress WHERE topic_id = :id")?
            .bind("id", topic_id.0.to_string())
            .execute(&tx)
            .await?;

        tx.commit().await
    }

    /// Schedules the next fetch attempt using the configured retry
    /// schedule and releases the claim.
    pub async fn topic_fetch_incomplete(
        &self,
        topic_id: TopicId,
        retry_delays: &Backoff,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        let attempts: i64 = query(
            "SELECT content_fetch_attempts_since_success FROM topic WHERE id = :id",
        )?
        .bind("id", topic_id.0.to_string())
        .pluck(&tx)
        .await?
        .map(|c| -> Result<i64, Error> { column_as_number!(c) })
        .transpose()?
        .unwrap_or(0);

        let next_delay = retry_delays.next_delay_seconds(attempts.max(0) as u32);
        let next_attempt = Utc::now() + chrono::Duration::seconds(next_delay);

        query(
            "UPDATE topic SET content_fetch_attempts_since_success = content_fetch_attempts_since_success + 1, \
             content_fetch_next_attempt = :next_attempt WHERE id = :id",
        )?
        .bind("next_attempt", next_attempt)
        .bind("id", topic_id.0.to_string())
        .execute(&tx)
        .await?;

        query("DELETE FROM topic_fetch_in_progress WHERE topic_id = :id")?
            .bind("id", topic_id.0.to_string())
            .execute(&tx)
            .await?;

        tx.commit().await
    }

    /// Writes new content, appends a history row, and marks the topic
    /// active. A no-op on the content
    /// columns (but still a success) when the new hash matches the stored
    /// one.
    pub async fn topic_set_content(&self, update: TopicContentUpdate) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        let existing_hash: Option<String> =
            query("SELECT content_hash FROM topic WHERE id = :id")?
                .bind("id", update.topic_id.0.to_string())
                .pluck(&tx)
                .await?
                .map(|c| -> Result<Option<String>, Error> { column_as_nullable_string!(c) })
                .transpose()?
                .flatten();

        if existing_hash.as_deref() == Some(update.content_hash.as_str()) {
            query("UPDATE topic SET is_active = true WHERE id = :id")?
                .bind("id", update.topic_id.0.to_string())
                .execute(&tx)
                .await?;
            return tx.commit().await;
        }

        let now = Utc::now();

        query(
            "UPDATE topic SET is_active = true, content_updated = :now, content = :content, \
             content_hash = :content_hash, content_type = :content_type, http_etag = :etag, \
             http_last_modified = :last_modified WHERE id = :id",
        )?
        .bind("now", now)
        .bind("content", update.content.clone())
        .bind("content_hash", update.content_hash.clone())
        .bind("content_type", update.content_type)
        .bind("etag", update.etag)
        .bind("last_modified", update.last_modified)
        .bind("id", update.topic_id.0.to_string())
        .execute(&tx)
        .await?;

        let history = TopicContentHistoryEntry {
            topic_id: update.topic_id,
            content_updated: now,
            content_size: update.content.len() as i64,
            content_hash: update.content_hash,
        };
        super::history::insert(&tx, &history).await?;

        tx.commit().await
    }

    /// Deletes the topic when it is marked `isDeleted` and has no
    /// remaining subscribers. Idempotent:
    /// a repeat call on an already-removed topic is a no-op, not an error.
    pub async fn topic_pending_delete(&self, topic_id: TopicId) -> Result<(), Error> {
        let conn = self.conn()?;
        query(
            "DELETE FROM topic WHERE id = :id AND is_deleted = true \
             AND NOT EXISTS ( \
               SELECT 1 FROM subscription s \
               JOIN topic t ON t.id = s.topic_id \
               WHERE t.id = :id AND s.expires > :now \
             )",
        )?
        .bind("id", topic_id.0.to_string())
        .bind("now", Utc::now())
        .execute(&*conn)
        .await?;
        Ok(())
    }

    pub async fn mark_topic_deleted(&self, topic_id: TopicId) -> Result<(), Error> {
        let conn = self.conn()?;
        query("UPDATE topic SET is_deleted = true WHERE id = :id")?
            .bind("id", topic_id.0.to_string())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Used by the content-cache layer; reads the current content
    /// snapshot without needing the full `Topic` row.
    pub async fn topic_get_content_by_id(
        &self,
        topic_id: TopicId,
    ) -> Result<Option<(Vec<u8>, Option<String>)>, Error> {
        let conn = self.conn()?;
        let row = query("SELECT content, content_type FROM topic WHERE id = :id")?
            .bind("id", topic_id.0.to_string())
            .fetch_one(&*conn)
            .await?;

        row.map(|row| {
            unpack_into!(let (content, content_type) = row);
            Ok::<_, Error>((
                column_as_binary!(content),
                column_as_nullable_string!(content_type),
            ))
        })
        .transpose()
    }
}
