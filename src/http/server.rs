//! Proxy server setup and accept loop.
//!
//! # Responsibilities
//! - Build the upstream client and the Axum router for plain requests
//! - Accept connections under the listener's connection limit
//! - Serve each connection with HTTP/1.1 and upgrades enabled
//! - Route CONNECT to the tunnel handler, everything else to the dispatcher
//! - Stop accepting on shutdown and drain in-flight connections

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::http::dispatcher::{dispatch, ProxyState};
use crate::http::tunnel;
use crate::net::connection::{ConnectionGuard, ConnectionTracker};
use crate::net::listener::Listener;
use crate::security::AccessControl;

/// HTTP server for the forward proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    state: ProxyState,
}

impl HttpServer {
    /// Create a new server sharing the given blocklists and cache.
    pub fn new(config: ProxyConfig, access: Arc<AccessControl>, cache: Arc<CacheStore>) -> Self {
        let connect_timeout = Duration::from_secs(config.timeouts.connect_secs);

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let state = ProxyState {
            access,
            cache,
            client,
            cache_enabled: config.cache.enabled,
            connect_timeout,
        };

        let router = Self::build_router(&config, state.clone());
        Self {
            router,
            config,
            state,
        }
    }

    /// Build the Axum router for non-CONNECT requests.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: ProxyState) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server until `shutdown` fires, then drain connections.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let listener = Listener::from_tcp(listener, self.config.listener.max_connections)?;
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            max_connections = listener.max_connections(),
            cache_enabled = self.state.cache_enabled,
            "Proxy server starting"
        );

        let tracker = ConnectionTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        let guard = tracker.track();
                        let state = self.state.clone();
                        let router = self.router.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            serve_connection(stream, peer, guard, state, router).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        let grace = Duration::from_secs(self.config.timeouts.shutdown_grace_secs);
        if tokio::time::timeout(grace, tracker.wait_for_shutdown()).await.is_err() {
            tracing::warn!(
                remaining = tracker.active_count(),
                "Shutdown grace period elapsed with connections open"
            );
        }

        tracing::info!("Proxy server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Shared proxy state (blocklists, cache, client).
    pub fn state(&self) -> &ProxyState {
        &self.state
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    guard: ConnectionGuard,
    state: ProxyState,
    router: Router,
) {
    let span = tracing::debug_span!("connection", connection_id = %guard.id(), peer = %peer);

    let service = service_fn(move |request: Request<Incoming>| {
        let state = state.clone();
        let router = router.clone();
        async move {
            let request = request.map(Body::new);
            if request.method() == Method::CONNECT {
                Ok::<_, Infallible>(tunnel::handle_connect(state, request).await)
            } else {
                router.oneshot(request).await
            }
        }
    });

    async move {
        let connection = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades();
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Connection closed with error");
        }
        drop(guard);
    }
    .instrument(span)
    .await;
}
