//! Startup orchestration.
//!
//! # Responsibilities
//! - Prepare the cache directory
//! - Build the shared blocklists and cache
//! - Start the metrics exporter and admin API when enabled
//! - Bind the proxy listener and serve until shutdown

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use super::Shutdown;
use crate::admin::{setup_admin_router, AdminState};
use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::http::HttpServer;
use crate::observability::metrics;
use crate::security::AccessControl;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cache directory {path}: {source}")]
    CacheDir {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to bind {what} on {address}: {source}")]
    Bind {
        what: &'static str,
        address: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Create the cache directory if it does not exist yet.
pub async fn prepare_cache_dir(dir: &Path) -> Result<(), StartupError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| StartupError::CacheDir {
            path: dir.display().to_string(),
            source,
        })
}

async fn bind(what: &'static str, address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            what,
            address: address.to_string(),
            source,
        })
}

/// Run the proxy until `shutdown` is triggered.
pub async fn run(config: ProxyConfig, shutdown: &Shutdown) -> Result<(), StartupError> {
    let cache_dir = Path::new(&config.cache.directory);
    prepare_cache_dir(cache_dir).await?;

    let access = Arc::new(AccessControl::from_config(&config.blocklist));
    let cache = Arc::new(CacheStore::from_config(&config.cache));
    tracing::info!(
        blocked_hosts = config.blocklist.hosts.len(),
        blocked_urls = config.blocklist.urls.len(),
        cache_dir = %cache_dir.display(),
        cache_enabled = config.cache.enabled,
        "Shared state initialized"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    if config.admin.enabled {
        let listener = bind("admin API", &config.admin.bind_address).await?;
        let router = setup_admin_router(AdminState::new(
            Arc::clone(&access),
            Arc::clone(&cache),
            &config.admin.api_key,
        ));
        let mut rx = shutdown.subscribe();
        tracing::info!(address = %config.admin.bind_address, "Admin API listening");
        tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        });
    }

    let listener = bind("proxy", &config.listener.bind_address).await?;
    let server = HttpServer::new(config, access, cache);
    server.run(listener, shutdown.subscribe()).await?;
    Ok(())
}
