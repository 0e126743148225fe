//! The bounded-concurrency polling loop that drives the three engines
//! (fetch, verification, delivery) off a shared claim budget.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hub_common::entities::{SubscriptionId, TopicId, VerificationId};
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::Store;
use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::delivery::DeliveryEngine;
use crate::fetch::FetchEngine;
use crate::verification::VerificationEngine;

/// Worker tuning, mirrors `WorkerConfig`/`CommunicationConfig`.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub recurr_sleep_ms: u64,
    pub startup_stagger_fraction: f64,
    pub claim_timeout_seconds: i64,
}

enum Claim {
    Fetch(TopicId),
    Verification(VerificationId),
    Delivery(SubscriptionId),
}

/// Drives one combined in-flight set across the fetch, verification, and
/// delivery queues, round-robin, proportional to the number claimed from
/// each on the prior refill.
pub struct Worker<RM> {
    store: Store<RM>,
    fetch: Arc<FetchEngine<RM>>,
    verification: Arc<VerificationEngine<RM>>,
    delivery: Arc<DeliveryEngine<RM>>,
    settings: WorkerSettings,
    claimant: String,
    is_processing: Arc<AtomicBool>,
    wake: Arc<Notify>,
    shutdown: Arc<Notify>,
}

impl<RM> Worker<RM>
where
    RM: DatabasePool + 'static,
{
    pub fn new(
        store: Store<RM>,
        fetch: Arc<FetchEngine<RM>>,
        verification: Arc<VerificationEngine<RM>>,
        delivery: Arc<DeliveryEngine<RM>>,
        settings: WorkerSettings,
        claimant: String,
    ) -> Self {
        Self {
            store,
            fetch,
            verification,
            delivery,
            settings,
            claimant,
            is_processing: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// A handle `processImmediately` callers use to cancel the pending
    /// timer and invoke `process()` right away.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Signals [`Self::run`] to stop scheduling further timers. In-flight
    /// claims are left to finish or expire on their own.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Runs until [`Self::shutdown`] is called. Never returns otherwise.
    pub async fn run(&self) {
        let stagger_ceiling =
            (self.settings.recurr_sleep_ms as f64 * self.settings.startup_stagger_fraction) as u64;
        let stagger = if stagger_ceiling > 0 {
            rand::thread_rng().gen_range(0..=stagger_ceiling)
        } else {
            0
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(stagger)) => {}
            _ = self.shutdown.notified() => return,
        }

        loop {
            self.process().await;

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.settings.recurr_sleep_ms)) => {}
                _ = self.wake.notified() => {}
                _ = self.shutdown.notified() => return,
            }
        }
    }

    /// Guarded by `is_processing`: a concurrent call (e.g. a wake racing
    /// the timer) returns immediately instead of running twice.
    pub async fn process(&self) {
        if self.is_processing.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut in_flight = JoinSet::new();

        loop {
            let capacity = self.settings.concurrency.saturating_sub(in_flight.len());
            if capacity > 0 {
                let claimed = self.refill(capacity).await;
                for claim in claimed {
                    self.spawn_claim(&mut in_flight, claim);
                }
            }

            if in_flight.is_empty() {
                break;
            }

            if let Some(result) = in_flight.join_next().await {
                if let Err(err) = result {
                    tracing::warn!(%err, "worker task panicked");
                }
            }
        }

        self.is_processing.store(false, Ordering::SeqCst);
    }

    /// Claims up to `capacity` tasks, round-robin across the three
    /// queues so no queue starves another under a shared budget.
    async fn refill(&self, capacity: usize) -> Vec<Claim> {
        let per_queue = (capacity / 3).max(1);
        let mut claims = Vec::new();

        match self
            .store
            .claim_topic_fetch_batch(
                per_queue as i64,
                self.settings.claim_timeout_seconds,
                &self.claimant,
            )
            .await
        {
            Ok(ids) => claims.extend(ids.into_iter().map(Claim::Fetch)),
            Err(err) => tracing::warn!(%err, "failed to claim topic fetch batch"),
        }

        match self
            .store
            .claim_verification_batch(
                per_queue as i64,
                self.settings.claim_timeout_seconds,
                &self.claimant,
            )
            .await
        {
            Ok(ids) => claims.extend(ids.into_iter().map(Claim::Verification)),
            Err(err) => tracing::warn!(%err, "failed to claim verification batch"),
        }

        match self
            .store
            .claim_subscription_delivery_batch(
                per_queue as i64,
                self.settings.claim_timeout_seconds,
                &self.claimant,
            )
            .await
        {
            Ok(ids) => claims.extend(ids.into_iter().map(Claim::Delivery)),
            Err(err) => tracing::warn!(%err, "failed to claim subscription delivery batch"),
        }

        claims.truncate(capacity);
        claims
    }

    fn spawn_claim(&self, in_flight: &mut JoinSet<()>, claim: Claim) {
        match claim {
            Claim::Fetch(topic_id) => {
                let engine = self.fetch.clone();
                in_flight.spawn(async move {
                    if let Err(err) = engine.process(topic_id).await {
                        tracing::warn!(%topic_id, %err, "fetch engine task failed");
                    }
                });
            }
            Claim::Verification(verification_id) => {
                let engine = self.verification.clone();
                in_flight.spawn(async move {
                    if let Err(err) = engine.process(verification_id).await {
                        tracing::warn!(%verification_id, %err, "verification engine task failed");
                    }
                });
            }
            Claim::Delivery(subscription_id) => {
                let engine = self.delivery.clone();
                in_flight.spawn(async move {
                    if let Err(err) = engine.process(subscription_id).await {
                        tracing::warn!(%subscription_id, %err, "delivery engine task failed");
                    }
                });
            }
        }
    }
}
