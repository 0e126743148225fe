//! Very simple connection pool, shared by every backend so no backend
//! needs its own external pooling dependency: checkouts block on a
//! condition variable rather than polling, and a poisoned resource is
//! dropped from the pool instead of being handed back out.

use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::database::DatabaseConnector;

/// Pool error.
#[derive(Debug, thiserror::Error)]
pub enum Error<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// A lock was poisoned by a panicking holder.
    #[error("Internal: PoisonError")]
    Poison,

    /// No resource became available before the timeout elapsed.
    #[error("Timed out waiting for a resource")]
    Timeout,

    /// The underlying driver failed to create a new resource.
    #[error(transparent)]
    Resource(#[from] E),
}

/// Pool sizing configuration.
pub trait DatabaseConfig: Clone + Debug + Send + Sync {
    /// Maximum number of resources the pool may hold at once.
    fn max_size(&self) -> usize;

    /// Default time to wait for a free resource before giving up.
    fn default_timeout(&self) -> Duration;
}

/// Manages the lifecycle of pooled resources.
pub trait DatabasePool: Debug {
    /// The pooled resource itself.
    type Connection: DatabaseConnector;

    /// Configuration needed to create a new resource.
    type Config: DatabaseConfig;

    /// Error returned while creating a new resource.
    type Error: Debug + std::error::Error + Send + Sync + 'static;

    /// Creates a new resource.
    ///
    /// If `stale` is ever set to `true`, the resource is assumed no longer
    /// valid and is dropped rather than returned to the pool.
    fn new_resource(
        config: &Self::Config,
        stale: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Result<Self::Connection, Error<Self::Error>>;

    /// Called when a resource is permanently removed from the pool.
    fn drop(_resource: Self::Connection) {}
}

/// Generic connection pool of resources managed by `RM`.
#[derive(Debug)]
pub struct Pool<RM>
where
    RM: DatabasePool,
{
    config: RM::Config,
    queue: Mutex<Vec<(Arc<AtomicBool>, RM::Connection)>>,
    in_use: AtomicUsize,
    max_size: usize,
    default_timeout: Duration,
    waiter: Condvar,
}

/// A resource checked out of a [`Pool`]. Returned to the pool on drop.
pub struct PooledResource<RM>
where
    RM: DatabasePool,
{
    resource: Option<(Arc<AtomicBool>, RM::Connection)>,
    pool: Arc<Pool<RM>>,
}

impl<RM> Debug for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Resource: {:?}", self.resource)
    }
}

impl<RM> Drop for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            let mut active_resource = self.pool.queue.lock().expect("active_resource");
            active_resource.push(resource);
            self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
            drop(active_resource);

            self.pool.waiter.notify_one();
        }
    }
}

impl<RM> Deref for PooledResource<RM>
where
    RM: DatabasePool,
{
    type Target = RM::Connection;

    fn deref(&self) -> &Self::Target {
        &self.resource.as_ref().expect("resource already dropped").1
    }
}

impl<RM> DerefMut for PooledResource<RM>
where
    RM: DatabasePool,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.resource.as_mut().expect("resource already dropped").1
    }
}

impl<RM> Pool<RM>
where
    RM: DatabasePool,
{
    /// Creates a new pool.
    pub fn new(config: RM::Config) -> Arc<Self> {
        Arc::new(Self {
            default_timeout: config.default_timeout(),
            max_size: config.max_size(),
            config,
            queue: Default::default(),
            in_use: Default::default(),
            waiter: Default::default(),
        })
    }

    /// Like [`Pool::get_timeout`] but uses the pool's default timeout.
    #[inline(always)]
    pub fn get(self: &Arc<Self>) -> Result<PooledResource<RM>, Error<RM::Error>> {
        self.get_timeout(self.default_timeout)
    }

    /// Checks out a free resource, creating a new one if the pool still has
    /// room, or waits for one to be released.
    #[inline(always)]
    pub fn get_timeout(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<PooledResource<RM>, Error<RM::Error>> {
        let mut resources = self.queue.lock().map_err(|_| Error::Poison)?;
        let time = Instant::now();

        loop {
            if let Some((stale, resource)) = resources.pop() {
                if !stale.load(Ordering::SeqCst) {
                    // Increment before releasing the mutex, so a concurrent
                    // waiter sees in_use already reflect this checkout
                    // instead of racing to create a duplicate resource.
                    self.in_use.fetch_add(1, Ordering::AcqRel);
                    drop(resources);

                    return Ok(PooledResource {
                        resource: Some((stale, resource)),
                        pool: self.clone(),
                    });
                }
            }

            if self.in_use.load(Ordering::Relaxed) < self.max_size {
                self.in_use.fetch_add(1, Ordering::AcqRel);
                drop(resources);
                let stale: Arc<AtomicBool> = Arc::new(false.into());
                match RM::new_resource(&self.config, stale.clone(), timeout) {
                    Ok(new_resource) => {
                        return Ok(PooledResource {
                            resource: Some((stale, new_resource)),
                            pool: self.clone(),
                        });
                    }
                    Err(e) => {
                        self.in_use.fetch_sub(1, Ordering::AcqRel);
                        return Err(e);
                    }
                }
            }

            resources = self
                .waiter
                .wait_timeout(resources, timeout)
                .map_err(|_| Error::Poison)
                .and_then(|(lock, timeout_result)| {
                    if timeout_result.timed_out() {
                        tracing::warn!(
                            "Timeout waiting for a database resource (pool size: {}). Waited {} ms",
                            self.max_size,
                            time.elapsed().as_millis()
                        );
                        Err(Error::Timeout)
                    } else {
                        Ok(lock)
                    }
                })?;
        }
    }
}

impl<RM> Drop for Pool<RM>
where
    RM: DatabasePool,
{
    fn drop(&mut self) {
        if let Ok(mut resources) = self.queue.lock() {
            loop {
                while let Some(resource) = resources.pop() {
                    RM::drop(resource.1);
                }

                if self.in_use.load(Ordering::Relaxed) == 0 {
                    break;
                }

                resources = if let Ok(resources) = self.waiter.wait(resources) {
                    resources
                } else {
                    break;
                };
            }
        }
    }
}
