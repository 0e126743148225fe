//! Append-only publish-frequency history.

use hub_common::database::Error;
use hub_common::entities::{TopicContentHistoryEntry, TopicId};

use crate::database::DatabaseExecutor;
use crate::pool::DatabasePool;
use crate::stmt::query;

use super::{parse_datetime, parse_uuid, Store};

pub(crate) async fn insert<C: DatabaseExecutor>(
    conn: &C,
    entry: &TopicContentHistoryEntry,
) -> Result<(), Error> {
    query(
        "INSERT INTO topic_content_history (topic_id, content_updated, content_size, content_hash) \
         VALUES (:topic_id, :content_updated, :content_size, :content_hash)",
    )?
    .bind("topic_id", entry.topic_id.0.to_string())
    .bind("content_updated", entry.content_updated)
    .bind("content_size", entry.content_size)
    .bind("content_hash", entry.content_hash.clone())
    .execute(conn)
    .await?;
    Ok(())
}

fn row_to_entry(row: Vec<crate::stmt::Column>) -> Result<TopicContentHistoryEntry, Error> {
    unpack_into!(let (topic_id, content_updated, content_size, content_hash) = row);
    Ok(TopicContentHistoryEntry {
        topic_id: TopicId(parse_uuid(topic_id)?),
        content_updated: parse_datetime(content_updated)?,
        content_size: column_as_number!(content_size),
        content_hash: column_as_string!(content_hash),
    })
}

impl<RM> Store<RM>
where
    RM: DatabasePool,
{
    /// Used for the publish-frequency chart surfaced on `/info`; not read
    /// by any engine.
    pub async fn topic_content_history(
        &self,
        topic_id: TopicId,
        limit: i64,
    ) -> Result<Vec<TopicContentHistoryEntry>, Error> {
        let conn = self.conn()?;
        let rows = query(
            "SELECT topic_id, content_updated, content_size, content_hash \
             FROM topic_content_history WHERE topic_id = :topic_id \
             ORDER BY content_updated DESC LIMIT :limit",
        )?
        .bind("topic_id", topic_id.0.to_string())
        .bind("limit", limit)
        .fetch_all(&*conn)
        .await?;

        rows.into_iter().map(row_to_entry).collect()
    }
}
