//! Host and URL blocklists.
//!
//! Membership is exact string equality; there is no wildcard or pattern
//! matching. Absolute URL entries are stored in the form request targets are
//! compared in, so `http://host` and `http://host/` name the same entry. Both sets are safe to read from in-flight requests while the
//! admin API mutates them.

use std::fmt;
use std::str::FromStr;

use axum::http::Uri;
use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use crate::config::BlocklistConfig;

/// Which blocklist an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockKind {
    Host,
    Url,
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockKind::Host => f.write_str("host"),
            BlockKind::Url => f.write_str("url"),
        }
    }
}

impl FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(BlockKind::Host),
            "url" => Ok(BlockKind::Url),
            other => Err(format!("unknown block kind '{}', expected 'host' or 'url'", other)),
        }
    }
}

/// Blocked hostnames and blocked request targets.
#[derive(Debug, Default)]
pub struct AccessControl {
    hosts: DashSet<String>,
    urls: DashSet<String>,
}

impl AccessControl {
    /// Create empty blocklists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create blocklists seeded from configuration.
    pub fn from_config(config: &BlocklistConfig) -> Self {
        let access = Self::new();
        for host in &config.hosts {
            access.block(BlockKind::Host, host);
        }
        for url in &config.urls {
            access.block(BlockKind::Url, url);
        }
        tracing::info!(
            hosts = access.hosts.len(),
            urls = access.urls.len(),
            "Blocklists loaded"
        );
        access
    }

    /// True if `host` is a blocked host or `url` is a blocked URL.
    pub fn is_url_blocked(&self, host: &str, url: &str) -> bool {
        self.hosts.contains(host) || self.urls.contains(url)
    }

    /// True if `host` is a blocked host. URLs are not consulted.
    pub fn is_host_blocked(&self, host: &str) -> bool {
        self.hosts.contains(host)
    }

    /// Add `value` to the `kind` blocklist. Returns true if it was not already present.
    pub fn block(&self, kind: BlockKind, value: &str) -> bool {
        self.set(kind).insert(normalize(kind, value))
    }

    /// Remove `value` from the `kind` blocklist. Returns true iff something was removed.
    pub fn unblock(&self, kind: BlockKind, value: &str) -> bool {
        self.set(kind).remove(&normalize(kind, value)).is_some()
    }

    /// Current members of the `kind` blocklist, in unspecified order.
    ///
    /// The iterator is lazy; calling `list` again restarts it.
    pub fn list(&self, kind: BlockKind) -> impl Iterator<Item = String> + '_ {
        self.set(kind).iter().map(|entry| entry.key().clone())
    }

    pub fn list_hosts(&self) -> impl Iterator<Item = String> + '_ {
        self.list(BlockKind::Host)
    }

    pub fn list_urls(&self) -> impl Iterator<Item = String> + '_ {
        self.list(BlockKind::Url)
    }

    /// Number of entries in the `kind` blocklist.
    pub fn len(&self, kind: BlockKind) -> usize {
        self.set(kind).len()
    }

    fn set(&self, kind: BlockKind) -> &DashSet<String> {
        match kind {
            BlockKind::Host => &self.hosts,
            BlockKind::Url => &self.urls,
        }
    }
}

/// Rewrite absolute URLs the way `Uri` prints request targets (an empty path
/// becomes `/`). Hosts and anything unparseable are kept verbatim.
fn normalize(kind: BlockKind, value: &str) -> String {
    if kind == BlockKind::Url {
        if let Ok(uri) = value.parse::<Uri>() {
            if uri.scheme().is_some() && uri.authority().is_some() {
                return uri.to_string();
            }
        }
    }
    value.to_string()
}
