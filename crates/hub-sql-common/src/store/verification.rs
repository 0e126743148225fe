//! Verification persistence and its claim queue, keyed by `(topic_id,
//! callback)` rather than by verification id.

use chrono::Utc;
use hub_common::database::Error;
use hub_common::entities::{HashAlgorithm, TopicId, Verification, VerificationId, VerificationMode};
use hub_common::Backoff;
use url::Url;

use crate::pool::DatabasePool;
use crate::stmt::{query, Column};

use super::{parse_datetime, parse_url, parse_uuid, Store};

const VERIFICATION_COLUMNS: &str = "id, topic_id, callback, created, mode, secret, \
    signature_algorithm, http_remote_addr, http_from, lease_seconds, is_publisher_validated, \
    reason, request_id, attempts, next_attempt";

fn verification_from_row(row: Vec<Column>) -> Result<Verification, Error> {
    unpack_into!(let (
        id, topic_id, callback, created, mode, secret, signature_algorithm, http_remote_addr,
        http_from, lease_seconds, is_publisher_validated, reason, request_id, attempts, next_attempt
    ) = row);

    Ok(Verification {
        id: VerificationId(parse_uuid(id)?),
        topic_id: TopicId(parse_uuid(topic_id)?),
        callback: parse_url(callback)?,
        created: parse_datetime(created)?,
        mode: {
            let s = column_as_string!(mode);
            s.parse::<VerificationMode>()?
        },
        secret: column_as_nullable_string!(secret),
        signature_algorithm: {
            let s = column_as_string!(signature_algorithm);
            s.parse::<HashAlgorithm>()?
        },
        http_remote_addr: column_as_nullable_string!(http_remote_addr),
        http_from: column_as_nullable_string!(http_from),
        lease_seconds: column_as_number!(lease_seconds),
        is_publisher_validated: column_as_number!(is_publisher_validated),
        reason: column_as_nullable_string!(reason),
        request_id: column_as_nullable_string!(request_id),
        attempts: column_as_number!(attempts),
        next_attempt: parse_datetime(next_attempt)?,
    })
}

/// Fields needed to append a new verification.
#[derive(Debug, Clone)]
pub struct VerificationInsert {
    pub topic_id: TopicId,
    pub callback: Url,
    pub mode: VerificationMode,
    pub secret: Option<String>,
    pub signature_algorithm: HashAlgorithm,
    pub http_remote_addr: Option<String>,
    pub http_from: Option<String>,
    pub lease_seconds: i64,
    pub is_publisher_validated: bool,
    pub reason: Option<String>,
    pub request_id: Option<String>,
}

impl<RM> Store<RM>
where
    RM: DatabasePool,
{
    pub async fn get_verification(
        &self,
        verification_id: VerificationId,
    ) -> Result<Option<Verification>, Error> {
        let conn = self.conn()?;
        let row = query(&format!(
            "SELECT {VERIFICATION_COLUMNS} FROM verification WHERE id = :id"
        ))?
        .bind("id", verification_id.0.to_string())
        .fetch_one(&*conn)
        .await?;
        row.map(verification_from_row).transpose()
    }

    /// Appends a new verification. Does not claim it; the newest
    /// verification per `(topicId, callback)` becomes eligible for claim
    /// once its `nextAttempt` is due.
    pub async fn verification_insert(&self, data: VerificationInsert) -> Result<VerificationId, Error> {
        let conn = self.conn()?;
        let id = VerificationId::new();
        let now = Utc::now();

        query(
            "INSERT INTO verification (id, topic_id, callback, created, mode, secret, \
             signature_algorithm, http_remote_addr, http_from, lease_seconds, \
             is_publisher_validated, reason, request_id, attempts, next_attempt) \
             VALUES (:id, :topic_id, :callback, :created, :mode, :secret, :algo, :remote_addr, \
             :from, :lease_seconds, :validated, :reason, :request_id, 0, :next_attempt)",
        )?
        .bind("id", id.0.to_string())
        .bind("topic_id", data.topic_id.0.to_string())
        .bind("callback", data.callback.as_str())
        .bind("created", now)
        .bind("mode", data.mode.to_string())
        .bind("secret", data.secret)
        .bind("algo", data.signature_algorithm.to_string())
        .bind("remote_addr", data.http_remote_addr)
        .bind("from", data.http_from)
        .bind("lease_seconds", data.lease_seconds)
        .bind("validated", data.is_publisher_validated)
        .bind("reason", data.reason)
        .bind("request_id", data.request_id)
        .bind("next_attempt", now)
        .execute(&*conn)
        .await?;

        Ok(id)
    }

    /// Batch-claims the newest verification per `(topicId, callback)` pair
    /// that is eligible to run.
    pub async fn claim_verification_batch(
        &self,
        wanted: i64,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<Vec<VerificationId>, Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;
        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        let rows = query(
            "SELECT v.id, v.topic_id, v.callback FROM verification v \
             JOIN topic t ON t.id = v.topic_id \
             WHERE t.is_active = true \
               AND v.next_attempt <= :now \
               AND v.created = ( \
                 SELECT MAX(v2.created) FROM verification v2 \
                 WHERE v2.topic_id = v.topic_id AND v2.callback = v.callback \
               ) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM verification_in_progress p \
                 WHERE p.topic_id = v.topic_id AND p.callback = v.callback AND p.claim_expires >= :now \
               ) \
             LIMIT :wanted \
             FOR UPDATE SKIP LOCKED",
        )?
        .bind("now", now)
        .bind("wanted", wanted)
        .fetch_all(&tx)
        .await?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in rows {
            unpack_into!(let (id, topic_id, callback) = row);
            let verification_id = VerificationId(parse_uuid(id)?);
            let topic_id_text = column_as_string!(topic_id);
            let callback_text = column_as_string!(callback);

            query(
                "INSERT INTO verification_in_progress (topic_id, callback, claimant, claimed, claim_expires) \
                 VALUES (:topic_id, :callback, :claimant, :claimed, :expires) \
                 ON CONFLICT (topic_id, callback) DO UPDATE SET \
                   claimant = excluded.claimant, claimed = excluded.claimed, \
                   claim_expires = excluded.claim_expires",
            )?
            .bind("topic_id", topic_id_text)
            .bind("callback", callback_text)
            .bind("claimant", claimant)
            .bind("claimed", now)
            .bind("expires", expires)
            .execute(&tx)
            .await?;

            claimed.push(verification_id);
        }

        tx.commit().await?;
        Ok(claimed)
    }

    /// Claims a single verification by id for `processImmediately`.
    /// Unconditional overwrite, like subscription delivery.
    pub async fn claim_verification_by_id(
        &self,
        verification_id: VerificationId,
        claim_timeout_seconds: i64,
        claimant: &str,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let verification = self
            .get_verification(verification_id)
            .await?
            .ok_or_else(|| Error::Internal("verification vanished before claim".to_owned()))?;

        let now = Utc::now();
        let expires = now + chrono::Duration::seconds(claim_timeout_seconds);

        query(
            "INSERT INTO verification_in_progress (topic_id, callback, claimant, claimed, claim_expires) \
             VALUES (:topic_id, :callback, :claimant, :claimed, :expires) \
             ON CONFLICT (topic_id, callback) DO UPDATE SET \
               claimant = excluded.claimant, claimed = excluded.claimed, \
               claim_expires = excluded.claim_expires",
        )?
        .bind("topic_id", verification.topic_id.0.to_string())
        .bind("callback", verification.callback.as_str())
        .bind("claimant", claimant)
        .bind("claimed", now)
        .bind("expires", expires)
        .execute(&*conn)
        .await?;

        Ok(())
    }

    pub async fn release_verification(
        &self,
        topic_id: TopicId,
        callback: &Url,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        query("DELETE FROM verification_in_progress WHERE topic_id = :topic_id AND callback = :callback")?
            .bind("topic_id", topic_id.0.to_string())
            .bind("callback", callback.as_str())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Deletes this verification and every older sibling for the same
    /// `(topicId, callback)`, and releases the claim.
    pub async fn verification_complete(
        &self,
        verification_id: VerificationId,
        topic_id: TopicId,
        callback: &Url,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        let created: chrono::DateTime<Utc> = query("SELECT created FROM verification WHERE id = :id")?
            .bind("id", verification_id.0.to_string())
            .pluck(&tx)
            .await?
            .map(|c| -> Result<chrono::DateTime<Utc>, Error> { super::parse_datetime(c) })
            .transpose()?
            .ok_or_else(|| Error::Internal("verification vanished during completion".to_owned()))?;

        query(
            "DELETE FROM verification WHERE topic_id = :topic_id AND callback = :callback \
             AND created <= :created",
        )?
        .bind("topic_id", topic_id.0.to_string())
        .bind("callback", callback.as_str())
        .bind("created", created)
        .execute(&tx)
        .await?;

        query("DELETE FROM verification_in_progress WHERE topic_id = :topic_id AND callback = :callback")?
            .bind("topic_id", topic_id.0.to_string())
            .bind("callback", callback.as_str())
            .execute(&tx)
            .await?;

        tx.commit().await
    }

    /// Mutates `mode`/`reason` of a claimed verification, e.g. marking it
    /// `denied` on challenge mismatch. Does not touch
    /// the claim.
    pub async fn verification_update(
        &self,
        verification_id: VerificationId,
        mode: VerificationMode,
        reason: Option<String>,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        query("UPDATE verification SET mode = :mode, reason = :reason WHERE id = :id")?
            .bind("mode", mode.to_string())
            .bind("reason", reason)
            .bind("id", verification_id.0.to_string())
            .execute(&*conn)
            .await?;
        Ok(())
    }

    /// Marks the verification's topic as publisher-validated and bumps
    /// `nextAttempt = now` so the in-flight claim immediately proceeds to
    /// the challenge step. Does not touch the claim.
    pub async fn verification_validated(&self, verification_id: VerificationId) -> Result<(), Error> {
        let conn = self.conn()?;
        query(
            "UPDATE verification SET is_publisher_validated = true, next_attempt = :now WHERE id = :id",
        )?
        .bind("now", Utc::now())
        .bind("id", verification_id.0.to_string())
        .execute(&*conn)
        .await?;
        Ok(())
    }

    /// Schedules the next attempt via the retry schedule and releases the
    /// claim.
    pub async fn verification_release(
        &self,
        verification_id: VerificationId,
        topic_id: TopicId,
        callback: &Url,
        retry_delays: &Backoff,
    ) -> Result<(), Error> {
        let conn = self.conn()?;
        let tx = conn.begin().await?;

        let attempts: i64 = query("SELECT attempts FROM verification WHERE id = :id")?
            .bind("id", verification_id.0.to_string())
            .pluck(&tx)
            .await?
            .map(|c| -> Result<i64, Error> { column_as_number!(c) })
            .transpose()?
            .unwrap_or(0);

        let next_delay = retry_delays.next_delay_seconds(attempts.max(0) as u32);
        let next_attempt = Utc::now() + chrono::Duration::seconds(next_delay);

        query(
            "UPDATE verification SET attempts = attempts + 1, next_attempt = :next_attempt \
             WHERE id = :id",
        )?
        .bind("next_attempt", next_attempt)
        .bind("id", verification_id.0.to_string())
        .execute(&tx)
        .await?;

        query("DELETE FROM verification_in_progress WHERE topic_id = :topic_id AND callback = :callback")?
            .bind("topic_id", topic_id.0.to_string())
            .bind("callback", callback.as_str())
            .execute(&tx)
            .await?;

        tx.commit().await
    }
}
