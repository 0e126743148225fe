//! Processes one claimed topic fetch: conditional GET, hub-link
//! verification, and content-hash comparison.

use hub_common::entities::TopicId;
use hub_common::Backoff;
use hub_http::HttpClient;
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::topic::TopicContentUpdate;
use hub_sql_common::store::Store;
use url::Url;

use crate::content_hash;
use crate::error::Error;

pub struct FetchEngine<RM> {
    store: Store<RM>,
    http: HttpClient,
    self_base_url: Url,
    strict_topic_hub_link: bool,
    retry_delays: Backoff,
}

impl<RM> FetchEngine<RM>
where
    RM: DatabasePool,
{
    pub fn new(
        store: Store<RM>,
        http: HttpClient,
        self_base_url: Url,
        strict_topic_hub_link: bool,
        retry_delays: Backoff,
    ) -> Self {
        Self {
            store,
            http,
            self_base_url,
            strict_topic_hub_link,
            retry_delays,
        }
    }

    /// Fetches and applies one claimed topic's content update.
    pub async fn process(&self, topic_id: TopicId) -> Result<(), Error> {
        let Some(topic) = self.store.get_topic(topic_id).await? else {
            self.store.release_topic_fetch(topic_id).await?;
            return Ok(());
        };

        if topic.is_deleted {
            self.store.topic_pending_delete(topic.id).await?;
            self.store.release_topic_fetch(topic.id).await?;
            return Ok(());
        }

        let response = self
            .http
            .conditional_get(
                &topic.url,
                topic.http_etag.as_deref(),
                topic.http_last_modified.as_deref(),
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(topic_id = %topic.id, %err, "topic fetch failed");
                self.store.topic_fetch_incomplete(topic.id, &self.retry_delays).await?;
                return Ok(());
            }
        };

        if response.is_not_modified() {
            self.store.topic_fetch_complete(topic.id).await?;
            return Ok(());
        }

        if !response.status.is_success() {
            self.store.topic_fetch_incomplete(topic.id, &self.retry_delays).await?;
            return Ok(());
        }

        if self.strict_topic_hub_link && !self.references_this_hub(&response, &topic.url) {
            self.store.mark_topic_deleted(topic.id).await?;
            self.store.topic_pending_delete(topic.id).await?;
            self.store.release_topic_fetch(topic.id).await?;
            return Ok(());
        }

        let content_type = response.content_type();
        let content_hash = content_hash::hash(topic.content_hash_algorithm, &response.body);

        if topic.content_hash.as_deref() == Some(content_hash.as_str()) {
            self.store.topic_fetch_complete(topic.id).await?;
            return Ok(());
        }

        self.store
            .topic_set_content(TopicContentUpdate {
                topic_id: topic.id,
                content: response.body.to_vec(),
                content_hash,
                content_type,
                etag: response.etag(),
                last_modified: response.last_modified(),
            })
            .await?;
        self.store.topic_fetch_complete(topic.id).await?;
        Ok(())
    }

    /// Whether any `rel="hub"` relation found in the headers or body
    /// names this hub's `selfBaseUrl`.
    fn references_this_hub(&self, response: &hub_http::HttpResponse, base: &Url) -> bool {
        let header_relations = response.link_relations(base);
        if header_relations.iter().any(|l| l.is_hub() && l.href == self.self_base_url) {
            return true;
        }

        let content_type = response.content_type();
        let body_relations = hub_http::extract_link_relations(
            content_type.as_deref(),
            &response.decoded_text(),
            base,
        )
        .unwrap_or_default();
        body_relations.iter().any(|l| l.is_hub() && l.href == self.self_base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_unchanged_body_is_detected_as_no_change() {
        let content = b"same content";
        let a = content_hash::hash(hub_common::entities::HashAlgorithm::Sha256, content);
        let b = content_hash::hash(hub_common::entities::HashAlgorithm::Sha256, content);
        assert_eq!(a, b);
    }
}
