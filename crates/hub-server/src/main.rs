//! The WebSub hub binary: loads configuration, opens the configured
//! store backend, and runs the HTTP surface plus the worker loop until a
//! shutdown signal arrives.

#[cfg(not(any(feature = "sqlite", feature = "postgres")))]
compile_error!("At least one database backend feature must be enabled: sqlite or postgres");

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use hub_server::cli::CliArgs;
use hub_server::config::{load_settings, work_directory};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let work_dir = work_directory(&args)?;
    let settings = load_settings(&work_dir, args.config)?;

    hub_server::setup_tracing(&settings.logging.level);

    let database_url = hub_server::resolve_database_url(&settings.database.url, &work_dir);
    let backend = hub_server::connect(&database_url).await?;

    let listen_addr = SocketAddr::from_str(&format!(
        "{}:{}",
        settings.server.listen_host, settings.server.listen_port
    ))?;

    tracing::info!(self_base_url = %settings.hub.self_base_url, "starting websub hub");

    match backend {
        #[cfg(feature = "sqlite")]
        hub_server::AnyBackend::Sqlite(store) => {
            hub_server::serve(store, &settings, listen_addr, None, shutdown_signal()).await?;
        }
        #[cfg(feature = "postgres")]
        hub_server::AnyBackend::Postgres(store) => {
            let postgres_cache = hub_postgres::listener::ContentCache::new();
            let listener_task = tokio::spawn(
                hub_postgres::listener::Listener::new(database_url.clone(), postgres_cache.clone()).run(),
            );
            let cache: Arc<dyn hub_common::cache::ContentCache> = Arc::new(postgres_cache);
            hub_server::serve(store, &settings, listen_addr, Some(cache), shutdown_signal()).await?;
            listener_task.abort();
        }
    }

    tracing::info!("websub hub shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install CTRL+C handler");
    tracing::info!("shutdown signal received");
}
