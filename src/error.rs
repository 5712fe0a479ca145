//! Error types shared across the proxy.

use thiserror::Error;

/// Failures of a single proxied request or tunnel.
///
/// Every variant is local to one connection; none of them is fatal to the
/// process.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Host or URL matched a blocklist entry.
    #[error("blocked by policy: {0}")]
    PolicyBlocked(String),

    /// Connecting to, or talking with, the origin or CONNECT target failed.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The request target does not name a host to forward to.
    #[error("invalid request target: {0}")]
    BadRequestTarget(String),

    /// A cache artifact was expected but absent.
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// Persisting a cache artifact failed.
    #[error("cache write failed: {0}")]
    CacheWrite(#[from] CacheError),
}

/// Failures inside the cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The header or body artifact for the URL does not exist.
    #[error("no cached artifact for {0}")]
    NotFound(String),

    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt header artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The body stream ended without completing (client disconnect, upstream
    /// error, or the writer fell too far behind the client relay).
    #[error("cache write abandoned before completion")]
    Abandoned,
}

impl CacheError {
    /// Map a filesystem error for `url`, turning a missing file into `NotFound`.
    pub fn from_io(url: &str, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound(url.to_string())
        } else {
            CacheError::Io(err)
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
