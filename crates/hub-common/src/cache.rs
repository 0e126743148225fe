//! The process-local topic content cache.
//!
//! Defined here, rather than alongside the Postgres `LISTEN`/`NOTIFY`
//! listener that invalidates it, so `hub-engine` can optionally read
//! through a cache without depending on a specific backend crate.
//! Strictly optional: a `Store` read always gives the correct answer,
//! a cache merely saves the round trip when many subscriptions for the
//! same topic are delivered back to back.

use async_trait::async_trait;

use crate::entities::TopicId;

#[async_trait]
pub trait ContentCache: std::fmt::Debug + Send + Sync {
    async fn get(&self, topic_id: TopicId) -> Option<(Vec<u8>, Option<String>)>;
    async fn insert(&self, topic_id: TopicId, content: Vec<u8>, content_type: Option<String>);
    async fn invalidate(&self, topic_id: TopicId);
}
