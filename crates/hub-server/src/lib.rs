//! Wires `Store` + the three engines + `Worker` + the axum router
//! together, generic over the backend's pool resource manager the same
//! way `hub-engine` is, so `hub-sqlite` and `hub-postgres` share this one
//! `serve` function instead of duplicating it.

pub mod cli;
pub mod config;
pub mod http;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use hub_common::config::Settings;
use hub_common::entities::TopicLeaseDefaults;
use hub_common::{cache::ContentCache, Backoff};
use hub_engine::{DeliveryEngine, FetchEngine, Manager, VerificationEngine, Worker, WorkerSettings};
use hub_http::HttpClient;
use hub_sql_common::pool::DatabasePool;
use hub_sql_common::store::Store;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::http::AppState;

/// Installs a `tracing-subscriber` `fmt` layer, quieting the usual noisy
/// dependencies (kept to stderr only; this hub has no file-logging
/// configuration surface).
pub fn setup_tracing(level: &str) {
    let env_filter = EnvFilter::try_new(format!(
        "{level},hyper=warn,h2=warn,tower_http=warn,rustls=warn,reqwest=warn"
    ))
    .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Runs the hub against an already-migrated [`Store`] until `shutdown`
/// resolves: binds the axum listener, starts the worker loop (if
/// `worker.pollingEnabled`), and drains both on shutdown.
pub async fn serve<RM>(
    store: Store<RM>,
    settings: &Settings,
    listen_addr: SocketAddr,
    cache: Option<Arc<dyn ContentCache>>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()>
where
    RM: DatabasePool + 'static,
{
    let self_base_url = Url::parse(&settings.hub.self_base_url).context("hub.selfBaseUrl must be an absolute URL")?;
    let claimant = settings
        .hub
        .node_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let http = HttpClient::new(
        hub_http::default_user_agent(&format!("websub-hub/{}", env!("CARGO_PKG_VERSION"))),
        Duration::from_secs(settings.communication.request_timeout_seconds),
    )?;
    let retry_delays = Backoff::new(settings.communication.retry_backoff_seconds.clone());
    let lease_defaults = TopicLeaseDefaults::from(settings.hub.topic_lease_defaults);

    let fetch = Arc::new(FetchEngine::new(
        store.clone(),
        http.clone(),
        self_base_url.clone(),
        settings.hub.strict_topic_hub_link,
        retry_delays.clone(),
    ));
    let verification = Arc::new(VerificationEngine::new(store.clone(), http.clone(), retry_delays.clone()));
    let mut delivery = DeliveryEngine::new(store.clone(), http, self_base_url.clone(), retry_delays);
    if let Some(cache) = cache {
        delivery = delivery.with_cache(cache);
    }
    let delivery = Arc::new(delivery);

    let manager = Manager::new(
        store.clone(),
        fetch.clone(),
        verification.clone(),
        settings.hub.clone(),
        lease_defaults,
        settings.communication.claim_timeout_seconds,
        claimant.clone(),
    );

    let worker = Worker::new(
        store.clone(),
        fetch,
        verification,
        delivery,
        WorkerSettings {
            concurrency: settings.worker.concurrency,
            recurr_sleep_ms: settings.worker.recurr_sleep_ms,
            startup_stagger_fraction: settings.worker.startup_stagger_fraction,
            claim_timeout_seconds: settings.communication.claim_timeout_seconds,
        },
        claimant,
    );

    let app_state = Arc::new(AppState {
        store,
        manager,
        self_base_url,
    });
    let router = http::router(app_state).layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind {listen_addr}"))?;
    tracing::info!("listening on {}", listener.local_addr().unwrap_or(listen_addr));

    let worker_task = if settings.worker.polling_enabled {
        let worker = Arc::new(worker);
        let running = worker.clone();
        Some((worker, tokio::spawn(async move { running.run().await })))
    } else {
        tracing::info!("worker polling disabled (worker.pollingEnabled = false)");
        None
    };

    let server_result = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    if let Some((worker, handle)) = worker_task {
        worker.shutdown();
        let _ = handle.await;
    }

    server_result.context("axum server exited with an error")
}

/// A connected, migrated store behind whichever backend feature matched
/// `settings.database.url`'s scheme.
pub enum AnyBackend {
    #[cfg(feature = "sqlite")]
    Sqlite(hub_sqlite::SqliteStore),
    #[cfg(feature = "postgres")]
    Postgres(hub_postgres::PostgresStore),
}

/// Resolves `database_url` against the compiled-in backend features and
/// returns a ready-to-use [`AnyBackend`], applying migrations along the
/// way. Only one of `sqlite`/`postgres` needs a matching
/// URL prefix for a given deployment; both features may be compiled in.
pub async fn connect(database_url: &str) -> Result<AnyBackend> {
    #[cfg(feature = "sqlite")]
    if database_url.starts_with("sqlite:") {
        let store = hub_sqlite::connect(database_url)
            .await
            .context("failed to open sqlite store")?;
        return Ok(AnyBackend::Sqlite(store));
    }

    #[cfg(feature = "postgres")]
    if database_url.starts_with("postgres:") || database_url.starts_with("postgresql:") {
        let store = hub_postgres::connect_store(database_url)
            .await
            .context("failed to connect to postgres store")?;
        return Ok(AnyBackend::Postgres(store));
    }

    anyhow::bail!(
        "unrecognized database.url {database_url:?}; expected a sqlite: or postgres(ql): connection string \
         matching a compiled-in backend feature"
    )
}

/// Resolves `work_dir` relative sqlite URLs so `sqlite://websub-hub.sqlite3`
/// in `config.toml` lands inside the work directory rather than the
/// process's current directory.
pub fn resolve_database_url(database_url: &str, work_dir: &Path) -> String {
    match database_url.strip_prefix("sqlite://") {
        Some(rest) if !rest.starts_with('/') && rest != ":memory:" => {
            format!("sqlite://{}", work_dir.join(rest).display())
        }
        _ => database_url.to_owned(),
    }
}
