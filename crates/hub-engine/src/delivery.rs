//! Processes one claimed subscription delivery: compose, sign, POST, and
//! react to the subscriber's response.

use std::sync::Arc;

use hub_common::cache::ContentCache;
use hub_common::entities::SubscriptionId;
use hub_common::Backoff;
use hub_http::HttpClient;
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::Store;
use url::Url;

use crate::error::Error;

pub struct DeliveryEngine<RM> {
    store: Store<RM>,
    http: HttpClient,
    self_base_url: Url,
    retry_delays: Backoff,
    cache: Option<Arc<dyn ContentCache>>,
}

impl<RM> DeliveryEngine<RM>
where
    RM: DatabasePool,
{
    pub fn new(store: Store<RM>, http: HttpClient, self_base_url: Url, retry_delays: Backoff) -> Self {
        Self {
            store,
            http,
            self_base_url,
            retry_delays,
            cache: None,
        }
    }

    /// Attaches an optional process-local content cache;
    /// only `hub-postgres` currently provides one.
    pub fn with_cache(mut self, cache: Arc<dyn ContentCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Delivers one claimed subscription's pending content update.
    pub async fn process(&self, subscription_id: SubscriptionId) -> Result<(), Error> {
        let Some(subscription) = self.store.get_subscription(subscription_id).await? else {
            self.store.release_subscription_delivery(subscription_id).await?;
            return Ok(());
        };

        let Some(topic) = self.store.get_topic(subscription.topic_id).await? else {
            self.store.release_subscription_delivery(subscription.id).await?;
            return Ok(());
        };

        let Some(content_updated) = topic.content_updated else {
            self.store.release_subscription_delivery(subscription.id).await?;
            return Ok(());
        };

        let (content, content_type) = self.load_content(topic.id).await?;

        let mut extra_headers = vec![(
            http::header::LINK,
            format!(
                r#"<{}>; rel="hub", <{}>; rel="self""#,
                self.self_base_url, topic.url
            ),
        )];
        if let Some(secret) = subscription.secret.as_deref() {
            let signature = hub_http::sign(subscription.signature_algorithm, secret, &content)?;
            extra_headers.push((
                http::HeaderName::from_static("x-hub-signature"),
                signature,
            ));
        }

        let response = self
            .http
            .post(
                &subscription.callback,
                content,
                content_type.as_deref(),
                &extra_headers,
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(subscription_id = %subscription.id, %err, "delivery request failed");
                self.store
                    .subscription_delivery_incomplete(subscription.id, &self.retry_delays)
                    .await?;
                return Ok(());
            }
        };

        if response.status.is_success() {
            self.store
                .subscription_delivery_complete(subscription.id, content_updated)
                .await?;
        } else if response.is_gone() {
            self.store.subscription_delivery_gone(subscription.id).await?;
        } else {
            self.store
                .subscription_delivery_incomplete(subscription.id, &self.retry_delays)
                .await?;
        }

        Ok(())
    }

    async fn load_content(
        &self,
        topic_id: hub_common::entities::TopicId,
    ) -> Result<(Vec<u8>, Option<String>), Error> {
        if let Some(cache) = self.cache.as_ref() {
            if let Some(hit) = cache.get(topic_id).await {
                return Ok(hit);
            }
        }

        let (content, content_type) = self
            .store
            .topic_get_content_by_id(topic_id)
            .await?
            .unwrap_or_default();

        if let Some(cache) = self.cache.as_ref() {
            cache.insert(topic_id, content.clone(), content_type.clone()).await;
        }

        Ok((content, content_type))
    }
}
