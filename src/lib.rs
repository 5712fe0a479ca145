//! Forward HTTP/HTTPS proxy with host and URL blocklists and a
//! validator-based response cache.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;

pub use cache::CacheStore;
pub use config::schema::ProxyConfig;
pub use error::{CacheError, ProxyError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::AccessControl;
