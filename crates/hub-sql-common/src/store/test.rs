//! Generic `Store<RM>` behavior tests, written once and run against every
//! backend via [`store_test!`]: a handful of `pub async fn` tests generic
//! over the backend, exercised by a macro each backend crate invokes with
//! its own fixture constructor.

use chrono::Utc;
use hub_common::entities::{HashAlgorithm, VerificationMode};
use url::Url;

use crate::pool::DatabasePool;
use crate::store::subscription::SubscriptionUpsert;
use crate::store::topic::TopicContentUpdate;
use crate::store::verification::VerificationInsert;
use crate::store::Store;

fn topic_url(path: &str) -> Url {
    Url::parse(&format!("https://publisher.example/{path}")).expect("url")
}

fn callback_url(path: &str) -> Url {
    Url::parse(&format!("https://subscriber.example/{path}")).expect("url")
}

/// A topic's fetch claim excludes it from a second concurrent claim until
/// released or expired.
pub async fn topic_fetch_claim_is_exclusive<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("a")).await.expect("create");
    store.topic_fetch_requested(topic.id).await.expect("request fetch");

    let first = store
        .claim_topic_fetch_batch(10, 300, "worker-a")
        .await
        .expect("claim");
    assert!(first.contains(&topic.id));

    let second = store
        .claim_topic_fetch_batch(10, 300, "worker-b")
        .await
        .expect("claim");
    assert!(!second.contains(&topic.id));

    store.release_topic_fetch(topic.id).await.expect("release");
    let third = store
        .claim_topic_fetch_batch(10, 300, "worker-b")
        .await
        .expect("claim");
    assert!(third.contains(&topic.id));
}

/// An unchanged content hash leaves the topic active but writes no history
/// row and resets the retry counters.
pub async fn topic_set_content_same_hash_is_noop<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("b")).await.expect("create");

    let update = TopicContentUpdate {
        topic_id: topic.id,
        content: b"hello".to_vec(),
        content_hash: "deadbeef".to_owned(),
        content_type: Some("text/plain".to_owned()),
        etag: None,
        last_modified: None,
    };
    store.topic_set_content(update.clone()).await.expect("set content");
    let before = store
        .topic_content_history(topic.id, 10)
        .await
        .expect("history");
    assert_eq!(before.len(), 1);

    store.topic_set_content(update).await.expect("set content again");
    let after = store
        .topic_content_history(topic.id, 10)
        .await
        .expect("history");
    assert_eq!(after.len(), 1, "repeat identical hash must not append history");
}

/// A changed content hash appends exactly one history row per call.
pub async fn topic_set_content_changed_hash_appends_history<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("c")).await.expect("create");

    store
        .topic_set_content(TopicContentUpdate {
            topic_id: topic.id,
            content: b"one".to_vec(),
            content_hash: "hash-one".to_owned(),
            content_type: None,
            etag: None,
            last_modified: None,
        })
        .await
        .expect("first content");

    store
        .topic_set_content(TopicContentUpdate {
            topic_id: topic.id,
            content: b"two".to_vec(),
            content_hash: "hash-two".to_owned(),
            content_type: None,
            etag: None,
            last_modified: None,
        })
        .await
        .expect("second content");

    let history = store
        .topic_content_history(topic.id, 10)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
}

/// `topicPendingDelete` is a no-op while a live subscription remains, and
/// succeeds once every subscription has expired or been removed.
pub async fn topic_pending_delete_waits_for_subscriptions<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("d")).await.expect("create");
    store
        .upsert_subscription(SubscriptionUpsert {
            topic_id: topic.id,
            callback: callback_url("cb"),
            lease_seconds: 3600,
            secret: None,
            signature_algorithm: HashAlgorithm::Sha256,
            http_remote_addr: None,
            http_from: None,
        })
        .await
        .expect("subscribe");

    store.mark_topic_deleted(topic.id).await.expect("mark deleted");
    store.topic_pending_delete(topic.id).await.expect("pending delete");
    assert!(
        store.get_topic(topic.id).await.expect("query").is_some(),
        "topic with a live subscription must not be removed"
    );

    store
        .delete_subscription(topic.id, &callback_url("cb"))
        .await
        .expect("delete subscription");
    store.topic_pending_delete(topic.id).await.expect("pending delete");
    assert!(
        store.get_topic(topic.id).await.expect("query").is_none(),
        "topic with no subscriptions left must be removed"
    );
}

/// Only the newest verification per `(topicId, callback)` is eligible for
/// claim; completing it removes every older sibling too.
pub async fn verification_complete_removes_older_siblings<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("e")).await.expect("create");
    let callback = callback_url("cb");

    let older = store
        .verification_insert(VerificationInsert {
            topic_id: topic.id,
            callback: callback.clone(),
            mode: VerificationMode::Subscribe,
            secret: None,
            signature_algorithm: HashAlgorithm::Sha256,
            http_remote_addr: None,
            http_from: None,
            lease_seconds: 3600,
            is_publisher_validated: true,
            reason: None,
            request_id: None,
        })
        .await
        .expect("insert older");

    let newest = store
        .verification_insert(VerificationInsert {
            topic_id: topic.id,
            callback: callback.clone(),
            mode: VerificationMode::Subscribe,
            secret: None,
            signature_algorithm: HashAlgorithm::Sha256,
            http_remote_addr: None,
            http_from: None,
            lease_seconds: 3600,
            is_publisher_validated: true,
            reason: None,
            request_id: None,
        })
        .await
        .expect("insert newest");

    let claimed = store
        .claim_verification_batch(10, 300, "worker-a")
        .await
        .expect("claim");
    assert_eq!(claimed, vec![newest]);

    store
        .verification_complete(newest, topic.id, &callback)
        .await
        .expect("complete");

    assert!(store.get_verification(older).await.expect("query").is_none());
    assert!(store.get_verification(newest).await.expect("query").is_none());
}

/// A successful delivery stamps `latestContentDelivered` to the topic's
/// current `contentUpdated` and releases the claim.
pub async fn subscription_delivery_complete_stamps_latest_content<RM: DatabasePool>(
    store: Store<RM>,
) {
    let topic = store.create_topic(&topic_url("f")).await.expect("create");
    let subscription_id = {
        let callback = callback_url("cb");
        store
            .upsert_subscription(SubscriptionUpsert {
                topic_id: topic.id,
                callback: callback.clone(),
                lease_seconds: 3600,
                secret: None,
                signature_algorithm: HashAlgorithm::Sha256,
                http_remote_addr: None,
                http_from: None,
            })
            .await
            .expect("subscribe");
        store
            .get_subscription_by_callback(topic.id, &callback)
            .await
            .expect("query")
            .expect("present")
            .id
    };

    store
        .claim_subscription_delivery_by_id(subscription_id, 300, "worker-a")
        .await
        .expect("claim");

    let content_updated = Utc::now();
    store
        .subscription_delivery_complete(subscription_id, content_updated)
        .await
        .expect("complete");

    let subscription = store
        .get_subscription(subscription_id)
        .await
        .expect("query")
        .expect("present");
    assert_eq!(subscription.latest_content_delivered, Some(content_updated));
    assert_eq!(subscription.delivery_attempts_since_success, 0);
}

/// A `410 Gone` response deletes the subscription outright, not just its
/// claim.
pub async fn subscription_delivery_gone_deletes_subscription<RM: DatabasePool>(store: Store<RM>) {
    let topic = store.create_topic(&topic_url("g")).await.expect("create");
    let callback = callback_url("cb");
    store
        .upsert_subscription(SubscriptionUpsert {
            topic_id: topic.id,
            callback: callback.clone(),
            lease_seconds: 3600,
            secret: None,
            signature_algorithm: HashAlgorithm::Sha256,
            http_remote_addr: None,
            http_from: None,
        })
        .await
        .expect("subscribe");
    let subscription_id = store
        .get_subscription_by_callback(topic.id, &callback)
        .await
        .expect("query")
        .expect("present")
        .id;

    store
        .subscription_delivery_gone(subscription_id)
        .await
        .expect("gone");

    assert!(store
        .get_subscription(subscription_id)
        .await
        .expect("query")
        .is_none());
}

/// Runs every shared `Store<RM>` test against a backend's fixture
/// constructor. `$make_store_fn` must be an `async fn() -> Store<RM>`
/// creating a fresh, migrated store per test.
#[macro_export]
macro_rules! store_test {
    ($make_store_fn:ident) => {
        #[tokio::test]
        async fn topic_fetch_claim_is_exclusive() {
            $crate::store::test::topic_fetch_claim_is_exclusive($make_store_fn().await).await;
        }

        #[tokio::test]
        async fn topic_set_content_same_hash_is_noop() {
            $crate::store::test::topic_set_content_same_hash_is_noop($make_store_fn().await).await;
        }

        #[tokio::test]
        async fn topic_set_content_changed_hash_appends_history() {
            $crate::store::test::topic_set_content_changed_hash_appends_history($make_store_fn().await)
                .await;
        }

        #[tokio::test]
        async fn topic_pending_delete_waits_for_subscriptions() {
            $crate::store::test::topic_pending_delete_waits_for_subscriptions($make_store_fn().await)
                .await;
        }

        #[tokio::test]
        async fn verification_complete_removes_older_siblings() {
            $crate::store::test::verification_complete_removes_older_siblings($make_store_fn().await)
                .await;
        }

        #[tokio::test]
        async fn subscription_delivery_complete_stamps_latest_content() {
            $crate::store::test::subscription_delivery_complete_stamps_latest_content(
                $make_store_fn().await,
            )
            .await;
        }

        #[tokio::test]
        async fn subscription_delivery_gone_deletes_subscription() {
            $crate::store::test::subscription_delivery_gone_deletes_subscription($make_store_fn().await)
                .await;
        }
    };
}
