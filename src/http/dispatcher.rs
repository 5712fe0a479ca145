//! Plain HTTP request lifecycle.
//!
//! ```text
//! request ──▶ resolve target ──▶ blocked? ──yes──▶ 403
//!                                   │no
//!                 GET + indexed? ──yes──▶ add If-None-Match / If-Modified-Since
//!                                   │
//!                                   ▼
//!                       forward (body streamed)
//!                                   │
//!        ┌──────────────────────────┼───────────────────────────┐
//!   304 on conditional          200 on GET                  anything else
//!   load artifact → 200       tee → client + cache          relay verbatim
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::response::Response;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tracing::Instrument;

use crate::cache::{tee, CacheStore};
use crate::error::ProxyError;
use crate::http::request::{RequestId, RequestTarget};
use crate::http::response;
use crate::observability::metrics;
use crate::security::AccessControl;

/// Shared state for the dispatcher and the tunnel handler.
#[derive(Clone)]
pub struct ProxyState {
    pub access: Arc<AccessControl>,
    pub cache: Arc<CacheStore>,
    pub client: Client<HttpConnector, Body>,
    pub cache_enabled: bool,
    pub connect_timeout: Duration,
}

/// Axum fallback handler for every non-CONNECT request.
pub async fn dispatch(State(state): State<ProxyState>, request: Request<Body>) -> Response {
    let request_id = RequestId::new();
    let span = tracing::debug_span!(
        "dispatch",
        request_id = %request_id,
        method = %request.method(),
        target = %request.uri(),
    );
    handle(state, request).instrument(span).await
}

async fn handle(state: ProxyState, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let (mut parts, body) = request.into_parts();

    // 1. Resolve target
    let target = match RequestTarget::resolve(&parts.uri, &parts.headers) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting request");
            metrics::record_request(method.as_str(), "bad_request", 400, start);
            return response::bad_request(e.to_string());
        }
    };

    // 2. Blocklist, before any upstream contact
    if target.is_blocked(&state.access) {
        let e = ProxyError::PolicyBlocked(target.raw.clone());
        tracing::info!(host = %target.host, error = %e, "Request blocked");
        metrics::record_request(method.as_str(), "blocked", 403, start);
        return response::blocked();
    }

    // 3. Attach validators for indexed GETs
    let cache_url = target.cache_url();
    let caching = state.cache_enabled && method == Method::GET;
    response::strip_hop_by_hop(&mut parts.headers);

    let mut unconditional_headers = None;
    if caching && state.cache.is_cached(&cache_url) {
        if let Some(validators) = state.cache.validators(&cache_url) {
            unconditional_headers = Some(parts.headers.clone());
            validators.apply_to(&mut parts.headers);
            tracing::debug!(?validators, "Sending conditional request");
        }
    }

    // 4. Forward, streaming the request body
    let version = parts.version;
    parts.uri = target.upstream.clone();
    let upstream = match forward(&state, Request::from_parts(parts, body)).await {
        Ok(r) => r,
        Err(e) => return upstream_failed(&method, e, start),
    };

    // 5. Interpret the response
    let upstream = match unconditional_headers {
        Some(headers) if upstream.status() == StatusCode::NOT_MODIFIED => {
            // the 304 body is never relayed
            drop(upstream);
            match state.cache.load(&cache_url).await {
                Ok(cached) => {
                    tracing::debug!(url = %cache_url, "Not modified, serving cached body");
                    metrics::record_request(method.as_str(), "revalidated", 200, start);
                    return response::from_cache(cached);
                }
                Err(e) => {
                    let miss = ProxyError::CacheMiss(e.to_string());
                    tracing::warn!(url = %cache_url, error = %miss, "Cached artifact unavailable, refetching");
                    state.cache.remove(&cache_url);
                    let retry = rebuild_request(&method, &target, version, headers);
                    match forward(&state, retry).await {
                        Ok(r) => r,
                        Err(e) => return upstream_failed(&method, e, start),
                    }
                }
            }
        }
        _ => upstream,
    };

    relay(&state, &method, &cache_url, caching, upstream, start)
}

async fn forward(state: &ProxyState, request: Request<Body>) -> Result<hyper::Response<Incoming>, ProxyError> {
    state
        .client
        .request(request)
        .await
        .map_err(|e| ProxyError::UpstreamUnavailable(e.to_string()))
}

/// Pass the upstream response through, teeing 200 GET bodies into the cache.
fn relay(
    state: &ProxyState,
    method: &Method,
    cache_url: &str,
    caching: bool,
    upstream: hyper::Response<Incoming>,
    start: Instant,
) -> Response {
    let (mut parts, body) = upstream.into_parts();
    response::strip_hop_by_hop(&mut parts.headers);
    let mut body = Body::new(body);
    let mut outcome = "passthrough";

    if caching && parts.status == StatusCode::OK {
        let (client_body, feed) = tee(body, state.cache.tee_capacity());
        if state.cache.store(cache_url, &parts.headers, feed.into_stream()) {
            tracing::debug!(url = %cache_url, "Caching response");
            outcome = "stored";
        }
        body = client_body;
    }

    metrics::record_request(method.as_str(), outcome, parts.status.as_u16(), start);
    Response::from_parts(parts, body)
}

fn rebuild_request(
    method: &Method,
    target: &RequestTarget,
    version: axum::http::Version,
    headers: HeaderMap,
) -> Request<Body> {
    let mut request = Request::new(Body::empty());
    *request.method_mut() = method.clone();
    *request.uri_mut() = target.upstream.clone();
    *request.version_mut() = version;
    *request.headers_mut() = headers;
    request
}

fn upstream_failed(method: &Method, error: ProxyError, start: Instant) -> Response {
    tracing::warn!(error = %error, "Upstream error");
    metrics::record_request(method.as_str(), "upstream_error", 502, start);
    response::upstream_failed()
}
