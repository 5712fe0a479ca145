//! Persistent response cache keyed by request target URL.
//!
//! # Responsibilities
//! - Own the in-memory validator index (the only answer to "is X cached")
//! - Own the on-disk header/body artifact pairs
//! - Install artifact pairs atomically with respect to concurrent loads
//!
//! # Design Decisions
//! - Index keyed by the raw URL string; the content hash only names files
//! - Artifacts are written to unique temp files, then both renamed into place
//!   under a per-key write lock; loads read the header and open the body
//!   under the matching read lock, so a load never pairs two versions
//! - An entry is registered only after both renames succeed

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::HeaderMap;
use dashmap::DashMap;
use futures_util::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::cache::entry::{HeaderBlob, ValidatorEntry};
use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::observability::metrics;

/// A cached response ready to be replayed.
#[derive(Debug)]
pub struct CachedResponse {
    pub headers: HeaderMap,
    /// Open handle on the body artifact taken under the read lock.
    pub body: fs::File,
}

impl CachedResponse {
    /// Stream the body artifact without buffering it.
    pub fn into_body(self) -> Body {
        Body::from_stream(ReaderStream::new(self.body))
    }
}

/// Validator index plus artifact directory.
#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    index: DashMap<String, ValidatorEntry>,
    locks: DashMap<CacheKey, Arc<RwLock<()>>>,
    tee_capacity: usize,
}

impl CacheStore {
    /// Create a store over an existing directory.
    pub fn new(dir: impl Into<PathBuf>, tee_capacity: usize) -> Self {
        Self {
            dir: dir.into(),
            index: DashMap::new(),
            locks: DashMap::new(),
            tee_capacity,
        }
    }

    /// Create a store from the `[cache]` config section.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(&config.directory, config.tee_buffer_chunks)
    }

    /// Directory holding the artifact files.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// Chunks the client relay may run ahead of the cache writer.
    pub fn tee_capacity(&self) -> usize {
        self.tee_capacity
    }

    /// Whether `url` has an index entry.
    pub fn is_cached(&self, url: &str) -> bool {
        self.index.contains_key(url)
    }

    /// Validators remembered for `url`, if cached.
    pub fn validators(&self, url: &str) -> Option<ValidatorEntry> {
        self.index.get(url).map(|entry| entry.value().clone())
    }

    /// Start caching an origin 200 response.
    ///
    /// Returns false, without touching the disk, if `headers` carry neither
    /// `ETag` nor `Last-Modified`. Otherwise the body is written by a spawned
    /// task and the entry becomes visible once it has been fully installed.
    pub fn store<S>(self: &Arc<Self>, url: &str, headers: &HeaderMap, body: S) -> bool
    where
        S: Stream<Item = CacheResult<Bytes>> + Send + 'static,
    {
        let Some(validators) = ValidatorEntry::from_headers(headers) else {
            return false;
        };

        let store = Arc::clone(self);
        let url = url.to_string();
        let headers = headers.clone();
        tokio::spawn(async move {
            match store.persist(&url, &headers, validators, body).await {
                Ok(bytes) => {
                    tracing::debug!(url = %url, bytes, "Cache entry committed");
                    metrics::record_cache_write("committed");
                    metrics::record_cache_entries(store.len());
                }
                Err(CacheError::Abandoned) => {
                    tracing::debug!(url = %url, "Cache write abandoned");
                    metrics::record_cache_write("abandoned");
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "Cache write failed");
                    metrics::record_cache_write("failed");
                }
            }
        });
        true
    }

    /// Write both artifacts for `url` and register `validators`.
    ///
    /// Returns the number of body bytes written. On any error the temp files
    /// are removed and the previously installed version (if any) stays intact.
    pub async fn persist<S>(
        &self,
        url: &str,
        headers: &HeaderMap,
        validators: ValidatorEntry,
        body: S,
    ) -> CacheResult<u64>
    where
        S: Stream<Item = CacheResult<Bytes>>,
    {
        let key = CacheKey::from_url(url);
        let write_id = Uuid::new_v4().simple().to_string();
        let (header_tmp, body_tmp) = key.temp_paths(&self.dir, &write_id);

        let result = self
            .write_and_install(url, &key, headers, validators, body, &header_tmp, &body_tmp)
            .await;
        if result.is_err() {
            let _ = fs::remove_file(&header_tmp).await;
            let _ = fs::remove_file(&body_tmp).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_and_install<S>(
        &self,
        url: &str,
        key: &CacheKey,
        headers: &HeaderMap,
        validators: ValidatorEntry,
        body: S,
        header_tmp: &Path,
        body_tmp: &Path,
    ) -> CacheResult<u64>
    where
        S: Stream<Item = CacheResult<Bytes>>,
    {
        let blob = serde_json::to_vec(&HeaderBlob::new(url, headers))?;
        fs::write(header_tmp, blob).await?;

        let mut file = fs::File::create(body_tmp).await?;
        let mut written = 0u64;
        futures_util::pin_mut!(body);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let lock = self.lock_for(key);
        let _guard = lock.write().await;
        fs::rename(header_tmp, key.header_path(&self.dir)).await?;
        if let Err(e) = fs::rename(body_tmp, key.body_path(&self.dir)).await {
            // The installed header no longer matches the installed body.
            self.index.remove(url);
            return Err(e.into());
        }
        self.index.insert(url.to_string(), validators);
        Ok(written)
    }

    /// Read the header artifact and open the body artifact for `url`.
    pub async fn load(&self, url: &str) -> CacheResult<CachedResponse> {
        let key = CacheKey::from_url(url);
        let lock = self.lock_for(&key);
        let _guard = lock.read().await;

        let raw = fs::read(key.header_path(&self.dir))
            .await
            .map_err(|e| CacheError::from_io(url, e))?;
        let blob: HeaderBlob = serde_json::from_slice(&raw)?;
        let body = fs::File::open(key.body_path(&self.dir))
            .await
            .map_err(|e| CacheError::from_io(url, e))?;

        Ok(CachedResponse {
            headers: blob.to_header_map(),
            body,
        })
    }

    /// Forget `url`. Returns true if it was cached.
    ///
    /// Artifact files are left in place; without an index entry they are
    /// never served and the next store overwrites them.
    pub fn remove(&self, url: &str) -> bool {
        let removed = self.index.remove(url).is_some();
        self.prune_lock(&CacheKey::from_url(url));
        if removed {
            metrics::record_cache_entries(self.len());
        }
        removed
    }

    /// Forget every cached URL.
    pub fn clear(&self) {
        self.index.clear();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        metrics::record_cache_entries(0);
    }

    /// Cached URLs in unspecified order. Calling again restarts the sequence.
    pub fn list(&self) -> impl Iterator<Item = String> + '_ {
        self.index.iter().map(|entry| entry.key().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn lock_for(&self, key: &CacheKey) -> Arc<RwLock<()>> {
        self.locks.entry(key.clone()).or_default().value().clone()
    }

    /// Drop the lock for `key` unless a load or install still holds it.
    fn prune_lock(&self, key: &CacheKey) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
