//! Validator-based response cache.
//!
//! # Data Flow
//! ```text
//! GET, URL indexed     → entry.rs (validators → If-None-Match / If-Modified-Since)
//! upstream 304         → store.rs load (header blob + body file) → client 200
//! upstream 200 + ETag  → tee.rs (client relay ┬→ client
//!                                             └→ bounded feed → store.rs persist)
//! ```
//!
//! # On-disk Layout
//! ```text
//! <cache dir>/<sha256(url)>.headers   JSON header blob
//! <cache dir>/<sha256(url)>.body      raw body bytes
//! <cache dir>/.<sha256(url)>.<id>.*.tmp  in-progress writes
//! ```

pub mod entry;
pub mod key;
pub mod store;
pub mod tee;

pub use entry::ValidatorEntry;
pub use key::CacheKey;
pub use store::{CacheStore, CachedResponse};
pub use tee::{tee, CacheFeed};
