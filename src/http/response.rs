//! Response construction and header hygiene.
//!
//! # Responsibilities
//! - Canned responses (blocked, bad request, upstream failure)
//! - Replay of cached artifacts as 200 responses
//! - CONNECT status lines with their exact reason phrases
//! - Strip hop-by-hop headers in both directions
//!
//! # Design Decisions
//! - Framing headers are dropped; hyper re-derives them from the body
//! - Cached bodies stream from disk, never fully buffered

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Version};
use axum::response::{IntoResponse, Response};
use hyper::ext::ReasonPhrase;

use crate::cache::CachedResponse;

/// Body sent for blocked plain requests.
pub const BLOCKED_BODY: &str = "<h1>403 Forbidden</h1><p>URL blocked</p>";

const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "proxy-authorization",
    "proxy-authenticate",
];

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// 403 for a blocked host or URL.
pub fn blocked() -> Response {
    (
        StatusCode::FORBIDDEN,
        [(header::CONTENT_TYPE, "text/html")],
        BLOCKED_BODY,
    )
        .into_response()
}

pub fn bad_request(reason: String) -> Response {
    (StatusCode::BAD_REQUEST, reason).into_response()
}

pub fn upstream_failed() -> Response {
    (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
}

/// Serve a revalidated artifact: status 200, cached headers, cached body.
pub fn from_cache(cached: CachedResponse) -> Response {
    let headers = cached.headers.clone();
    let mut response = Response::new(cached.into_body());
    *response.status_mut() = StatusCode::OK;
    *response.headers_mut() = headers;
    response
}

/// `HTTP/<version> 200 Connection established`.
pub fn connect_established(version: Version) -> Response {
    connect_status(version, StatusCode::OK, b"Connection established", false)
}

/// `HTTP/<version> 403 Connection forbidden`, then close.
pub fn connect_forbidden(version: Version) -> Response {
    connect_status(version, StatusCode::FORBIDDEN, b"Connection forbidden", true)
}

/// Best-effort reply when the CONNECT target is unreachable, then close.
pub fn connect_failed(version: Version) -> Response {
    connect_status(version, StatusCode::BAD_GATEWAY, b"Bad Gateway", true)
}

fn connect_status(version: Version, status: StatusCode, reason: &'static [u8], close: bool) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    *response.version_mut() = version;
    response.extensions_mut().insert(ReasonPhrase::from_static(reason));
    if close {
        response
            .headers_mut()
            .insert(header::CONNECTION, HeaderValue::from_static("close"));
    }
    response
}
