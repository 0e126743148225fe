//! `LISTEN`/`NOTIFY` based content-change notification and
//! the per-process content cache it invalidates.
//!
//! The `topic_content_changed` trigger installed by
//! `migrations/1.0.0/up.sql` calls `pg_notify('hub_topic_content_changed',
//! NEW.id)` whenever a topic's `content_updated` timestamp changes. This
//! module maintains a long-lived `LISTEN` connection, separate from the
//! pool (notifications require a dedicated session), and clears the
//! corresponding [`ContentCache`] entry on receipt.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use hub_common::backoff::Backoff;
use hub_common::cache::ContentCache as ContentCacheTrait;
use hub_common::entities::TopicId;
use tokio::sync::Mutex;
use tokio_postgres::{AsyncMessage, NoTls};

const CHANNEL: &str = "hub_topic_content_changed";

/// A process-local cache of topic content, keyed by [`TopicId`].
///
/// Populated by callers on `topic_get_content_by_id`, cleared by
/// [`Listener`] on notification or via [`ContentCache::invalidate`].
/// Strictly an optimization: its absence (or staleness, should a
/// notification be missed) never affects correctness, only how often
/// callers fall back to the store. Implements
/// [`hub_common::cache::ContentCache`] so `hub-engine` can use it
/// without depending on this crate.
#[derive(Debug, Clone, Default)]
pub struct ContentCache {
    entries: Arc<Mutex<HashMap<TopicId, (Vec<u8>, Option<String>)>>>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContentCacheTrait for ContentCache {
    async fn get(&self, topic_id: TopicId) -> Option<(Vec<u8>, Option<String>)> {
        self.entries.lock().await.get(&topic_id).cloned()
    }

    async fn insert(&self, topic_id: TopicId, content: Vec<u8>, content_type: Option<String>) {
        self.entries
            .lock()
            .await
            .insert(topic_id, (content, content_type));
    }

    async fn invalidate(&self, topic_id: TopicId) {
        self.entries.lock().await.remove(&topic_id);
    }
}

/// Maintains a dedicated `LISTEN hub_topic_content_changed` connection,
/// reconnecting with [`Backoff`] on disconnect. Intended to be driven by
/// a single long-lived task for the process's lifetime; `run` never
/// returns on its own, it retries forever and just logs each failure.
pub struct Listener {
    conn_str: String,
    cache: ContentCache,
    ping_interval: Duration,
    reconnect_backoff: Backoff,
}

impl Listener {
    pub fn new(conn_str: impl Into<String>, cache: ContentCache) -> Self {
        Self {
            conn_str: conn_str.into(),
            cache,
            ping_interval: Duration::from_secs(30),
            reconnect_backoff: Backoff::default(),
        }
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Backoff) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Runs the listen loop until the process exits. Never returns under
    /// normal operation; reconnects indefinitely on error.
    pub async fn run(self) {
        let mut attempts = 0u32;
        loop {
            match self.listen_once().await {
                Ok(()) => tracing::warn!("postgres listener connection closed"),
                Err(err) => tracing::warn!(%err, "postgres listener connection lost"),
            }
            let delay = self.reconnect_backoff.next_delay_seconds(attempts);
            attempts = attempts.saturating_add(1);
            tokio::time::sleep(Duration::from_secs(delay as u64)).await;
        }
    }

    /// Runs one connection's worth of the listen loop. Returns `Ok(())`
    /// once the server closes the connection cleanly, or `Err` if a
    /// request on it failed; either way the caller reconnects.
    async fn listen_once(&self) -> Result<(), tokio_postgres::Error> {
        let (client, mut connection) = tokio_postgres::connect(&self.conn_str, NoTls).await?;

        client
            .batch_execute(&format!("LISTEN {CHANNEL}"))
            .await?;
        tracing::info!(channel = CHANNEL, "postgres listener connected");

        let mut ticker = tokio::time::interval(self.ping_interval);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                message = future::poll_fn(|cx| connection.poll_message(cx)) => {
                    match message {
                        Some(Ok(AsyncMessage::Notification(notification))) => {
                            if notification.channel() == CHANNEL {
                                self.handle_payload(notification.payload()).await;
                            }
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err),
                        None => return Ok(()),
                    }
                }
                _ = ticker.tick() => {
                    // Sentinel payload; the receiving side discards anything
                    // that isn't a well-formed topic id, so this merely
                    // exercises the channel to surface dead connections
                    // promptly instead of waiting for the next real change.
                    client.batch_execute(&format!("NOTIFY {CHANNEL}, 'ping'")).await?;
                }
            }
        }
    }

    async fn handle_payload(&self, payload: &str) {
        match TopicId::from_str(payload) {
            Ok(topic_id) => self.cache.invalidate(topic_id).await,
            Err(_) => {
                // The periodic ping payload ("ping") lands here too.
                tracing::trace!(%payload, "ignoring non-topic-id notification payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_roundtrips_and_invalidates() {
        let cache = ContentCache::new();
        let topic_id = TopicId::new();

        assert!(cache.get(topic_id).await.is_none());

        cache
            .insert(topic_id, b"content".to_vec(), Some("text/plain".to_owned()))
            .await;
        assert_eq!(
            cache.get(topic_id).await,
            Some((b"content".to_vec(), Some("text/plain".to_owned())))
        );

        cache.invalidate(topic_id).await;
        assert!(cache.get(topic_id).await.is_none());
    }

    #[test]
    fn non_uuid_payload_is_not_a_topic_id() {
        assert!(TopicId::from_str("ping").is_err());
    }
}
