//! Publish/subscribe/unsubscribe acceptance: the boundary between the
//! HTTP dispatcher and the engines.

use std::sync::Arc;

use chrono::Utc;
use hub_common::config::HubConfig;
use hub_common::entities::{HashAlgorithm, TopicId, TopicLeaseDefaults, VerificationId, VerificationMode};
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::verification::VerificationInsert;
use hub_sql_common::store::Store;
use url::Url;

use crate::error::Error;
use crate::fetch::FetchEngine;
use crate::verification::VerificationEngine;

/// Whether a [`ValidationIssue`] blocks queueing or is merely advisory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    Warning,
    Error,
}

/// One machine-readable validation finding, returned to the caller
/// regardless of outcome.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub message: String,
    pub severity: IssueSeverity,
}

impl ValidationIssue {
    fn error(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: IssueSeverity::Error,
        }
    }

    fn warning(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: IssueSeverity::Warning,
        }
    }
}

fn has_error(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.severity == IssueSeverity::Error)
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub issues: Vec<ValidationIssue>,
    pub topic_id: Option<TopicId>,
}

impl PublishOutcome {
    pub fn accepted(&self) -> bool {
        self.topic_id.is_some() && !has_error(&self.issues)
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionOutcome {
    pub issues: Vec<ValidationIssue>,
    pub verification_id: Option<VerificationId>,
}

impl SubscriptionOutcome {
    pub fn accepted(&self) -> bool {
        self.verification_id.is_some() && !has_error(&self.issues)
    }
}

/// Fields common to both a subscribe and an unsubscribe intent, taken
/// from the `POST /` form keys (`hub.callback`, `hub.topic`, etc).
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub callback: String,
    pub topic_url: String,
    pub lease_seconds: Option<i64>,
    pub secret: Option<String>,
    pub signature_algorithm: HashAlgorithm,
    pub http_remote_addr: Option<String>,
    pub http_from: Option<String>,
}

pub struct Manager<RM> {
    store: Store<RM>,
    fetch: Arc<FetchEngine<RM>>,
    verification: Arc<VerificationEngine<RM>>,
    config: HubConfig,
    lease_defaults: TopicLeaseDefaults,
    claim_timeout_seconds: i64,
    claimant: String,
}

impl<RM> Manager<RM>
where
    RM: DatabasePool + 'static,
{
    pub fn new(
        store: Store<RM>,
        fetch: Arc<FetchEngine<RM>>,
        verification: Arc<VerificationEngine<RM>>,
        config: HubConfig,
        lease_defaults: TopicLeaseDefaults,
        claim_timeout_seconds: i64,
        claimant: String,
    ) -> Self {
        Self {
            store,
            fetch,
            verification,
            config,
            lease_defaults,
            claim_timeout_seconds,
            claimant,
        }
    }

    /// Validates and accepts (or rejects) a `hub.mode=publish` request.
    pub async fn publish(&self, topic_url: &str) -> Result<PublishOutcome, Error> {
        let mut issues = Vec::new();

        let url = match Url::parse(topic_url) {
            Ok(url) => url,
            Err(_) => {
                issues.push(ValidationIssue::error("invalid-topic-url", "hub.topic/hub.url must be an absolute URL"));
                return Ok(PublishOutcome { issues, topic_id: None });
            }
        };

        let topic = match self.store.get_topic_by_url(&url).await? {
            Some(topic) => topic,
            None if self.config.public_hub => self.store.create_topic(&url).await?,
            None => {
                issues.push(ValidationIssue::error("unknown-topic", "topic is not known to this hub"));
                return Ok(PublishOutcome { issues, topic_id: None });
            }
        };

        self.store.topic_fetch_requested(topic.id).await?;

        if self.config.process_immediately {
            let store = self.store.clone();
            let fetch = self.fetch.clone();
            let topic_id = topic.id;
            let claim_timeout_seconds = self.claim_timeout_seconds;
            let claimant = self.claimant.clone();
            tokio::spawn(async move {
                match store
                    .claim_topic_fetch_by_id(topic_id, claim_timeout_seconds, &claimant)
                    .await
                {
                    Ok(true) => {
                        if let Err(err) = fetch.process(topic_id).await {
                            tracing::warn!(%topic_id, %err, "immediate fetch after publish failed");
                        }
                    }
                    Ok(false) => {
                        tracing::debug!(%topic_id, "immediate fetch skipped, already claimed");
                    }
                    Err(err) => {
                        tracing::warn!(%topic_id, %err, "failed to claim topic for immediate fetch");
                    }
                }
            });
        }

        Ok(PublishOutcome {
            issues,
            topic_id: Some(topic.id),
        })
    }

    /// Validates and accepts (or rejects) a `hub.mode=subscribe` request.
    pub async fn subscribe(&self, request: SubscribeRequest) -> Result<SubscriptionOutcome, Error> {
        self.accept(request, VerificationMode::Subscribe).await
    }

    /// Validates and accepts (or rejects) a `hub.mode=unsubscribe` request.
    /// Rejects when no matching live subscription exists.
    pub async fn unsubscribe(&self, request: SubscribeRequest) -> Result<SubscriptionOutcome, Error> {
        let (mut issues, callback, topic) = match self.validate_common(&request, false).await? {
            Ok(validated) => validated,
            Err(issues) => return Ok(SubscriptionOutcome { issues, verification_id: None }),
        };

        let Some(topic) = topic else {
            return Ok(SubscriptionOutcome { issues, verification_id: None });
        };

        let now = Utc::now();
        let live = self
            .store
            .get_subscription_by_callback(topic.id, &callback)
            .await?
            .map(|s| s.is_live(now))
            .unwrap_or(false);

        if !live {
            issues.push(ValidationIssue::error(
                "no-matching-subscription",
                "no live subscription exists for this (topic, callback) pair",
            ));
            return Ok(SubscriptionOutcome { issues, verification_id: None });
        }

        self.insert_verification(request, topic.id, callback, VerificationMode::Unsubscribe, issues)
            .await
    }

    async fn accept(
        &self,
        request: SubscribeRequest,
        mode: VerificationMode,
    ) -> Result<SubscriptionOutcome, Error> {
        let (issues, callback, topic) = match self.validate_common(&request, true).await? {
            Ok(validated) => validated,
            Err(issues) => return Ok(SubscriptionOutcome { issues, verification_id: None }),
        };

        let Some(topic) = topic else {
            return Ok(SubscriptionOutcome { issues, verification_id: None });
        };

        self.insert_verification(request, topic.id, callback, mode, issues).await
    }

    /// Shared callback/secret/lease validation for subscribe and
    /// unsubscribe. `Ok(Err(issues))` means a blocking error was found
    /// before a topic lookup was possible; `Ok(Ok((issues, callback,
    /// topic)))` carries through for mode-specific handling, where
    /// `topic` is `None` only when an error issue already makes further
    /// processing moot.
    #[allow(clippy::type_complexity)]
    async fn validate_common(
        &self,
        request: &SubscribeRequest,
        allow_create_topic: bool,
    ) -> Result<Result<(Vec<ValidationIssue>, Url, Option<hub_common::entities::Topic>), Vec<ValidationIssue>>, Error>
    {
        let mut issues = Vec::new();

        let callback = match Url::parse(&request.callback) {
            Ok(url) => url,
            Err(_) => {
                issues.push(ValidationIssue::error("invalid-callback-url", "hub.callback must be an absolute URL"));
                return Ok(Err(issues));
            }
        };

        let topic_url = match Url::parse(&request.topic_url) {
            Ok(url) => url,
            Err(_) => {
                issues.push(ValidationIssue::error("invalid-topic-url", "hub.topic must be an absolute URL"));
                return Ok(Err(issues));
            }
        };

        if let Some(secret) = request.secret.as_ref() {
            if secret.len() > 199 {
                issues.push(ValidationIssue::error("secret-too-long", "hub.secret must be at most 199 bytes"));
            }
            if callback.scheme() != "https" {
                if self.config.strict_secrets {
                    issues.push(ValidationIssue::error(
                        "insecure-secret-transport",
                        "hub.secret was supplied but hub.callback is not https",
                    ));
                } else {
                    issues.push(ValidationIssue::warning(
                        "insecure-secret-transport",
                        "hub.secret was supplied over a non-https callback",
                    ));
                }
            }
        }

        let topic = match self.store.get_topic_by_url(&topic_url).await? {
            Some(topic) => Some(topic),
            None if allow_create_topic && self.config.public_hub => {
                Some(self.store.create_topic(&topic_url).await?)
            }
            None => {
                issues.push(ValidationIssue::error("unknown-topic", "topic is not known to this hub"));
                None
            }
        };

        if has_error(&issues) {
            return Ok(Err(issues));
        }

        let topic = topic.expect("no error issue implies topic lookup succeeded");
        Ok(Ok((issues, callback, Some(topic))))
    }

    async fn insert_verification(
        &self,
        request: SubscribeRequest,
        topic_id: TopicId,
        callback: Url,
        mode: VerificationMode,
        issues: Vec<ValidationIssue>,
    ) -> Result<SubscriptionOutcome, Error> {
        if has_error(&issues) {
            return Ok(SubscriptionOutcome { issues, verification_id: None });
        }

        let topic = self
            .store
            .get_topic(topic_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("topic {topic_id} vanished during subscribe")))?;
        let (min, preferred, max) = topic.lease_bounds(&self.lease_defaults);
        let lease_seconds = request.lease_seconds.unwrap_or(preferred).clamp(min, max);

        let verification_id = self
            .store
            .verification_insert(VerificationInsert {
                topic_id,
                callback,
                mode,
                secret: request.secret,
                signature_algorithm: request.signature_algorithm,
                http_remote_addr: request.http_remote_addr,
                http_from: request.http_from,
                lease_seconds,
                is_publisher_validated: !topic.requires_publisher_validation(),
                reason: None,
                request_id: None,
            })
            .await?;

        if self.config.process_immediately {
            let store = self.store.clone();
            let verification = self.verification.clone();
            let claim_timeout_seconds = self.claim_timeout_seconds;
            let claimant = self.claimant.clone();
            tokio::spawn(async move {
                if let Err(err) = store
                    .claim_verification_by_id(verification_id, claim_timeout_seconds, &claimant)
                    .await
                {
                    tracing::warn!(%verification_id, %err, "failed to claim verification for immediate processing");
                    return;
                }
                if let Err(err) = verification.process(verification_id).await {
                    tracing::warn!(%verification_id, %err, "immediate verification failed");
                }
            });
        }

        Ok(SubscriptionOutcome {
            issues,
            verification_id: Some(verification_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hub_http::HttpClient;

    use super::*;

    async fn manager(config: HubConfig) -> (Manager<hub_sqlite::SqliteManager>, hub_sqlite::SqliteStore) {
        let store = hub_sqlite::memory().await.expect("memory store");
        let http = HttpClient::new("test/1.0", Duration::from_secs(5)).expect("client");
        let fetch = Arc::new(FetchEngine::new(
            store.clone(),
            http.clone(),
            Url::parse(&config.self_base_url).expect("self base url"),
            config.strict_topic_hub_link,
            hub_common::Backoff::default(),
        ));
        let verification = Arc::new(VerificationEngine::new(store.clone(), http, hub_common::Backoff::default()));
        let manager = Manager::new(
            store.clone(),
            fetch,
            verification,
            config,
            TopicLeaseDefaults::default(),
            300,
            "test-node".to_owned(),
        );
        (manager, store)
    }

    fn base_config() -> HubConfig {
        HubConfig {
            process_immediately: false,
            ..HubConfig::default()
        }
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_rejected_without_public_hub() {
        let (manager, _store) = manager(base_config()).await;
        let outcome = manager.publish("https://publisher.example/feed").await.expect("publish");
        assert!(!outcome.accepted());
        assert!(outcome.issues.iter().any(|i| i.code == "unknown-topic"));
    }

    #[tokio::test]
    async fn publish_to_unknown_topic_creates_it_under_public_hub() {
        let mut config = base_config();
        config.public_hub = true;
        let (manager, _store) = manager(config).await;

        let outcome = manager.publish("https://publisher.example/feed").await.expect("publish");
        assert!(outcome.accepted());
        assert!(outcome.topic_id.is_some());
    }

    #[tokio::test]
    async fn subscribe_rejects_oversized_secret() {
        let mut config = base_config();
        config.public_hub = true;
        let (manager, _store) = manager(config).await;

        let outcome = manager
            .subscribe(SubscribeRequest {
                callback: "https://subscriber.example/cb".to_owned(),
                topic_url: "https://publisher.example/feed".to_owned(),
                lease_seconds: None,
                secret: Some("x".repeat(200)),
                signature_algorithm: HashAlgorithm::Sha256,
                http_remote_addr: None,
                http_from: None,
            })
            .await
            .expect("subscribe");

        assert!(!outcome.accepted());
        assert!(outcome.issues.iter().any(|i| i.code == "secret-too-long"));
    }

    #[tokio::test]
    async fn subscribe_clamps_lease_seconds_to_topic_bounds() {
        let mut config = base_config();
        config.public_hub = true;
        let (manager, store) = manager(config).await;

        let topic_url: Url = "https://publisher.example/feed".parse().expect("url");
        store.create_topic(&topic_url).await.expect("create topic");

        let outcome = manager
            .subscribe(SubscribeRequest {
                callback: "https://subscriber.example/cb".to_owned(),
                topic_url: topic_url.to_string(),
                lease_seconds: Some(999_999_999),
                secret: None,
                signature_algorithm: HashAlgorithm::Sha256,
                http_remote_addr: None,
                http_from: None,
            })
            .await
            .expect("subscribe");

        assert!(outcome.accepted());
        let verification_id = outcome.verification_id.expect("verification queued");
        let verification = store
            .get_verification(verification_id)
            .await
            .expect("query")
            .expect("present");
        assert_eq!(verification.lease_seconds, TopicLeaseDefaults::default().max);
    }

    #[tokio::test]
    async fn unsubscribe_rejects_without_live_subscription() {
        let mut config = base_config();
        config.public_hub = true;
        let (manager, store) = manager(config).await;

        let topic_url: Url = "https://publisher.example/feed".parse().expect("url");
        store.create_topic(&topic_url).await.expect("create topic");

        let outcome = manager
            .unsubscribe(SubscribeRequest {
                callback: "https://subscriber.example/cb".to_owned(),
                topic_url: topic_url.to_string(),
                lease_seconds: None,
                secret: None,
                signature_algorithm: HashAlgorithm::Sha256,
                http_remote_addr: None,
                http_from: None,
            })
            .await
            .expect("unsubscribe");

        assert!(!outcome.accepted());
        assert!(outcome.issues.iter().any(|i| i.code == "no-matching-subscription"));
    }
}
