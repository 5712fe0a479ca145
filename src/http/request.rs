//! Request target resolution.
//!
//! # Responsibilities
//! - Generate a request ID for log correlation
//! - Resolve the host a plain request will be forwarded to
//! - Build the absolute upstream URI (also the cache index key)
//!
//! # Design Decisions
//! - Absolute-form targets use their own authority; origin-form targets are
//!   rebuilt from the Host header
//! - Blocking uses the hostname without port, matching CONNECT host checks

use std::fmt;

use axum::http::header::{HeaderMap, HOST};
use axum::http::uri::{Authority, Scheme, Uri};
use uuid::Uuid;

use crate::error::ProxyError;
use crate::security::AccessControl;

/// Per-request ID used in log spans. Not forwarded upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a plain HTTP request is going.
#[derive(Debug, Clone)]
pub struct RequestTarget {
    /// Target exactly as the client sent it.
    pub raw: String,
    /// Hostname without port.
    pub host: String,
    /// Absolute `http://` URI forwarded to the origin.
    pub upstream: Uri,
}

impl RequestTarget {
    /// Resolve the target from the request line and headers.
    pub fn resolve(uri: &Uri, headers: &HeaderMap) -> Result<Self, ProxyError> {
        let raw = uri.to_string();

        if let Some(authority) = uri.authority() {
            if uri.scheme() != Some(&Scheme::HTTP) {
                return Err(ProxyError::BadRequestTarget(format!(
                    "unsupported scheme in '{}', use CONNECT for TLS",
                    raw
                )));
            }
            return Ok(Self {
                host: authority.host().to_string(),
                upstream: uri.clone(),
                raw,
            });
        }

        let authority = headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Authority>().ok())
            .ok_or_else(|| ProxyError::BadRequestTarget(format!("no host for '{}'", raw)))?;

        let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
        let upstream = Uri::builder()
            .scheme(Scheme::HTTP)
            .authority(authority.clone())
            .path_and_query(path)
            .build()
            .map_err(|e| ProxyError::BadRequestTarget(e.to_string()))?;

        Ok(Self {
            host: authority.host().to_string(),
            upstream,
            raw,
        })
    }

    /// Key for the cache index: the absolute upstream URL.
    pub fn cache_url(&self) -> String {
        self.upstream.to_string()
    }

    /// Check the host, the raw target, and (for origin-form requests) the
    /// absolute URL against the blocklists.
    pub fn is_blocked(&self, access: &AccessControl) -> bool {
        if access.is_url_blocked(&self.host, &self.raw) {
            return true;
        }
        let absolute = self.cache_url();
        absolute != self.raw && access.is_url_blocked(&self.host, &absolute)
    }
}
