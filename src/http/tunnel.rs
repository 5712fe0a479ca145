//! CONNECT tunneling.
//!
//! # States
//! ```text
//! AwaitingConnect ──connected──▶ Tunneling ──either side closes──▶ Closed
//!        │
//!        └──blocked / connect failed──▶ Closed
//! ```
//!
//! # Design Decisions
//! - The outbound connection is opened before answering, so the 200 line is
//!   only sent once the target is reachable
//! - Bytes the client pipelined after the CONNECT head come out of the
//!   upgraded connection first and reach the target before anything else
//! - Tunneled bytes are never inspected

use std::fmt;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::error::ProxyError;
use crate::http::dispatcher::ProxyState;
use crate::http::response;
use crate::observability::metrics;

/// Port assumed when a CONNECT target omits one.
pub const DEFAULT_TUNNEL_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    AwaitingConnect,
    Tunneling,
    Closed,
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelPhase::AwaitingConnect => f.write_str("awaiting_connect"),
            TunnelPhase::Tunneling => f.write_str("tunneling"),
            TunnelPhase::Closed => f.write_str("closed"),
        }
    }
}

/// One CONNECT request from request line to close.
#[derive(Debug)]
pub struct Tunnel {
    host: String,
    port: u16,
    phase: TunnelPhase,
}

impl Tunnel {
    /// Parse the `host:port` authority of a CONNECT request.
    pub fn from_request<B>(request: &Request<B>) -> Result<Self, ProxyError> {
        let authority = request
            .uri()
            .authority()
            .ok_or_else(|| ProxyError::BadRequestTarget(request.uri().to_string()))?;
        Ok(Self {
            host: authority.host().to_string(),
            port: authority.port_u16().unwrap_or(DEFAULT_TUNNEL_PORT),
            phase: TunnelPhase::AwaitingConnect,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn phase(&self) -> TunnelPhase {
        self.phase
    }

    fn advance(&mut self, next: TunnelPhase) {
        debug_assert!(
            matches!(
                (self.phase, next),
                (TunnelPhase::AwaitingConnect, TunnelPhase::Tunneling)
                    | (TunnelPhase::AwaitingConnect, TunnelPhase::Closed)
                    | (TunnelPhase::Tunneling, TunnelPhase::Closed)
            ),
            "illegal tunnel transition {} -> {}",
            self.phase,
            next
        );
        tracing::trace!(host = %self.host, port = self.port, from = %self.phase, to = %next, "Tunnel transition");
        self.phase = next;
    }

    async fn connect(&self, state: &ProxyState) -> Result<TcpStream, ProxyError> {
        let target = format!("{}:{}", self.host, self.port);
        match tokio::time::timeout(state.connect_timeout, TcpStream::connect((self.host.as_str(), self.port))).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProxyError::UpstreamUnavailable(format!("{}: {}", target, e))),
            Err(_) => Err(ProxyError::UpstreamUnavailable(format!(
                "{}: connect timed out after {:?}",
                target, state.connect_timeout
            ))),
        }
    }

    /// Copy bytes both ways until either side closes or errors.
    async fn splice(mut self, upgraded: Upgraded, mut upstream: TcpStream) {
        self.advance(TunnelPhase::Tunneling);
        let mut client = TokioIo::new(upgraded);
        match tokio::io::copy_bidirectional(&mut client, &mut upstream).await {
            Ok((from_client, from_upstream)) => tracing::debug!(
                host = %self.host,
                port = self.port,
                from_client,
                from_upstream,
                "Tunnel finished"
            ),
            Err(e) => tracing::debug!(host = %self.host, port = self.port, error = %e, "Tunnel ended with error"),
        }
        self.advance(TunnelPhase::Closed);
    }
}

/// Handle a CONNECT request: check the host, connect, answer, then splice.
pub async fn handle_connect(state: ProxyState, mut request: Request<Body>) -> Response {
    let version = request.version();
    let mut tunnel = match Tunnel::from_request(&request) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed CONNECT target");
            return response::bad_request(e.to_string());
        }
    };

    if state.access.is_host_blocked(tunnel.host()) {
        let e = ProxyError::PolicyBlocked(tunnel.host().to_string());
        tracing::info!(port = tunnel.port(), error = %e, "Tunnel blocked");
        metrics::record_tunnel("blocked");
        tunnel.advance(TunnelPhase::Closed);
        return response::connect_forbidden(version);
    }

    let upstream = match tunnel.connect(&state).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(error = %e, "Tunnel connect failed");
            metrics::record_tunnel("connect_failed");
            tunnel.advance(TunnelPhase::Closed);
            return response::connect_failed(version);
        }
    };

    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => tunnel.splice(upgraded, upstream).await,
            Err(e) => {
                tracing::warn!(host = %tunnel.host(), error = %e, "Client upgrade failed, closing tunnel");
                tunnel.advance(TunnelPhase::Closed);
            }
        }
    });

    tracing::debug!("Tunnel established");
    metrics::record_tunnel("established");
    response::connect_established(version)
}
