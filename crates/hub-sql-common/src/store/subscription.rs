//! Subscription persistence and the delivery claim queue.

use chrono::Utc;
use hub_common::database::Error;
use hub_common::entities::{HashAlgorithm, Subscription, SubscriptionId, TopicId};
use hub_common::Backoff;
use url::Url;

use crate::pool::DatabasePool;
use crate::stmt::{query, Column};

use super::{parse_datetime, parse_datetime_opt, parse_url, parse_uuid, Store};

const SUBSCRIPTION_COLUMNS: &str = "id, topic_id, callback, created, verified, expires, secret, \
    signature_algorithm, http_remote_addr, http_from, content_delivered, \
    latest_content_delivered, delivery_attempts_since_success, delivery_next_attempt";

fn subscription_from_row(row: Vec<Column>) -> Result<Subscription, Error> {
    unpack_into!(let (
        id, topic_id, callback, created, verified, expires, secret, signature_algorithm,
        http_remote_addr, http_from, content_delivered, latest_content_delivered,
        delivery_attempts_since_success, delivery_next_attempt
    ) = row);

    Ok(Subscription {
        id: SubscriptionId(parse_uuid(id)?),
        topic_id: TopicId(parse_uuid(topic_id)?),
        callback: parse_url(callback)?,
        created: parse_datetime(created)?,
        verified: parse_datetime_opt(verified)?,
        expires: parse_datetime(expires)?,
        secret: column_as_nullable_string!(secret),
        signature_algorithm: {
            let s = column_as_string!(signature_algorithm);
            s.parse::<HashAlgorithm>()?
        },
        http_remote_addr: column_as_nullable_string!(http_remote_addr),
        http_from: column_as_nullable_string!(http_from),
        content_delivered: parse_datetime_opt(content_delivered)?,
        latest_content_delivered: parse_datetime_opt(latest_content_delivered)?,
        delivery_attempts_since_success: column_as_number!(delivery_attempts_since_success),
        delivery_next_attempt: parse_datetime_opt(delivery_next_attempt)?,
    })
}

/// Fields needed to upsert a subscription on verified subscribe.
#[derive(Debug, Clone)]
pub struct SubscriptionUpsert {
    pub topic_id: TopicId,
    pub callback: Url,
    pub lease_seconds: i64,
    pub secret: Option<String>,
    pub signature_algorithm: HashAlgorithm,
    pub http_remote_addr: Option<String>,
    pub http_from: Option<String>,
}

impl<RM> Store<RM>
where
    RM: DatabasePool,
{
    pub async fn get_subscription(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<Option<Subscription>, Error> {
        let conn = self.conn()?;
        let row = query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscription WHERE id = :id"
        ))?
        .bind("id", subscription_id.0.to_string())
        .fetch_one(&*conn)
        .await?;
        row.map(subscription_from_row).transpose()
    }

    pub async fn get_subscription_by_callback(
        &self,
        topic_id: TopicId,
        callback: &Url,
    ) -> Result<Option<Subscription>, Error> {
        let conn = self.conn()?;
        let row = query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscription \
             WHERE topic_id = :topic_id AND callback = :callback"
        ))?
        .bind("topic_id", topic_id.0.to_string())
        .bind("callback", callback.as_str())
        .fetch_one(&*conn)
        .await?;
        row.map(subscription_from_row).transpose()
    }

    pub async fn subscription_count_by_topic_url(&self, url: &Url) -> Result<i64, Error> {
        let conn = self.conn()?;
        query(
            "SELECT COUNT(*) FROM subscription s JOIN topic t ON t.id = s.topic_id \
             WHERE t.url = :url AND s.expires > :now",
        )?
        .bind("url", url.as_str())
        .bind("now", Utc::now())
        .pluck(&*conn)
        .await?
        .map(|c| -> Result<i64, Error> { column_as_number!(c) })
        .transpose()
        .map(|v| v.unwrap_or(0))
    }

    /// Upserts the subscription on a confirmed `subscribe` verification:
    /// `verified = now`, `expires = now + leaseSeconds`.
    pub async fn upsert_subscription(&self, data: SubscriptionUpsert) -> Result<(), Error> {
        let conn = self.conn()?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(data.lease_seconds);

        query(
            "INSERT INTO subscription (id, topic_id, callback, created, verified, expires, \
             secret, signature_algorithm, http_remote_addr, http_from, \
             delivery_attempts_since_success, latest_content_delivered) \
             VALUES (:id, :topic_id, :callback, :created, :verified, :expires, :secret, :algo, \
             :remote_addr, :from, 0, NULL) \
             ON CONFLICT (topic_id, callback) DO UPDATE SET \
               verified = excluded.verified, expires = excluded.expires, \
               secret = excluded.secret, signature_algorithm = excluded.signature_algorithm, \
               http_remote_addr = excluded.http_remote_addr, http_from = excluded.http_from",
        )?
        .bind("id", SubscriptionId::new().0.to_string())
        .bind("topic_id", data.topic_id.0.to_string())
        .bind("callback", data.callback.as_str())
        .bind("created", now)
        .bind("verified", now)
        .bind("expires", expires)
        .bind("secret", data.secret)
        .bind("algo", data.signature_algorithm.to_string())
        .bind("remote_addr", data.http_remote_addr)
        .bind("from", data.http_from)
        .execute(&*conn)
        .await?;

        Ok(())
    }

    /// Deletes a subscription outright. Cascades to its in-progress delivery claim.
    pub async fn delete_subscription(
        &self,
        topic_id: TopicId,
        callback: &Url,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        query("DELETE FROM subscription WHERE topic_id = :topic_id AND callback = :callback")?
            .bind("topic_id", topic_id.0.to_string())
            .bind("callback", callback.as_str())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Batch-claims subscriptions due for delivery, clustered by topic so one worker
    /// batch can reuse a cached topic body.
    pub async fn claim_subscription_delivery_batch(
        &self,
        wanted: i64,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<Vec<SubscriptionId>, Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        let rows = query(
            "SELECT s.id, s.topic_id FROM subscription s \
             JOIN topic t ON t.id = s.topic_id \
             WHERE s.expires > :now \
               AND (s.latest_content_delivered IS NULL OR s.latest_content_delivered < t.content_updated) \
               AND (s.delivery_next_attempt IS NULL OR s.delivery_next_attempt <= :now) \
               AND s.id NOT IN ( \
                 SELECT subscription_id FROM subscription_delivery_in_progress WHERE claim_expires >= :now \
               ) \
             ORDER BY s.topic_id, s.id \
             LIMIT :wanted \
             FOR UPDATE SKIP LOCKED",
        )?
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            unpack_into!(let (id, _topic_id) = row);
            let subscription_id = SubscriptionId(parse_uuid(id)?);

            query(
                "INSERT INTO subscription_delivery_in_progress (subscription_id, claimant, claimed, claim_expires) \
                 VALUES (:id, :claimant, :claimed, :expires) \
                 ON CONFLICT (subscription_id) DO UPDATE SET \
                   claimant = excluded.claimant, claimed = excluded.claimed, \
                   claim_expires = excluded.claim_expires",
            )?
            .bind("id", subscription_id.0.to_string())
            .bind("claimant", claimant)
            .bind("claimed", now)
            .bind("expires", expires)
            .execute(&tx)
            .await?;

            claimed.push(subscription_id);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Claims a single subscription by id. Unconditional overwrite: a
    /// `processImmediately` delivery is initiated with intent to process
    /// now.
    pub async fn claim_subscription_delivery_by_id(
        &self,
        subscription_id: SubscriptionId,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        query(
            "INSERT INTO subscription_delivery_in_progress (subscription_id, claimant, claimed, claim_expires) \
             VALUES (:id, :claimant, :claimed, :expires) \
             ON CONFLICT (subscription_id) DO UPDATE SET \
               claimant = excluded.claimant, claimed = excluded.claimed, \
               claim_expires = excluded.claim_expires",
        )?
        .bind("id", subscription_id.0.to_string())
        .bind("claimant", claimant)
        .bind("claimed", now)
        .bind("expires", expires)
        .execute(&*conn)
        .await?;

        Ok(())
    }

    pub async fn release_subscription_delivery(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        query("DELETE FROM subscription_delivery_in_progress WHERE subscription_id = :id")?
            .bind("id", subscription_id.0.to_string())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Records a successful delivery and releases the claim.
    pub async fn subscription_delivery_complete(
        &self,
        subscription_id: SubscriptionId,
        topic_content_updated: chrono::DateTime<Utc>,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        query(
            "UPDATE subscription SET content_delivered = :now, latest_content_delivered = :content_updated, \
             delivery_attempts_since_success = 0, delivery_next_attempt = NULL WHERE id = :id",
        )?
        .bind("now", Utc::now())
        .bind("content_updated", topic_content_updated)
        .bind("id", subscription_id.0.to_string())
        .execute(&tx)
        .await?;

        query("DELETE FROM subscription_delivery_in_progress WHERE subscription_id = :id")?
            .bind("id", subscription_id.0.to_string())
            .execute(&tx)
            .await?;

        tx.commit().await
    }

    /// Unsubscribes a subscriber whose callback returned `410 Gone`.
    /// Cascades to the claim.
    pub async fn subscription_delivery_gone(
        &self,
        subscription_id: SubscriptionId,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        query("DELETE FROM subscription WHERE id = :id")?
            .bind("id", subscription_id.0.to_string())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Symmetric to [`Store::topic_fetch_incomplete`].
    pub async fn subscription_delivery_incomplete(
        &self,
        subscription_id: SubscriptionId,
        retry_delays: &Backoff,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        let attempts: i64 = query(
            "SELECT delivery_attempts_since_success FROM subscription WHERE id = :id",
        )?
        .bind("id", subscription_id.0.to_string())
        .pluck(&tx)
        .await?
        .map(|c| -> Result<i64, Error> { column_as_number!(c) })
        .transpose()?
        .unwrap_or(0);

        let next_delay = retry_delays.next_delay_seconds(attempts.max(0) as u32);
        let next_attempt = Utc::now() + chrono::Duration::seconds(next_delay);

        query(
            "UPDATE subscription SET delivery_attempts_since_success = delivery_attempts_since_success + 1, \
             delivery_next_attempt = :next_attempt WHERE id = :id",
        )?
        .bind("next_attempt", next_attempt)
        .bind("id", subscription_id.0.to_string())
        .execute(&tx)
        .await?;

        query("DELETE FROM subscription_delivery_in_progress WHERE subscription_id = :id")?
            .bind("id", subscription_id.0.to_string())
            .execute(&tx)
            .await?;

        tx.commit().await
    }
}
