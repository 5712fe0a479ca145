//! Content-hash keys naming on-disk cache artifacts.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

const HEADER_SUFFIX: &str = "headers";
const BODY_SUFFIX: &str = "body";

/// SHA-256 hex digest of a request target URL.
///
/// Only used for artifact file names; the in-memory index is keyed by the
/// raw URL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the serialized response headers.
    pub fn header_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, HEADER_SUFFIX))
    }

    /// Path of the raw response body.
    pub fn body_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", self.0, BODY_SUFFIX))
    }

    /// Unique temporary paths for one write of this key's artifact pair.
    ///
    /// Temporary files live in the cache directory so the final rename stays
    /// on one filesystem.
    pub fn temp_paths(&self, dir: &Path, write_id: &str) -> (PathBuf, PathBuf) {
        (
            dir.join(format!(".{}.{}.{}.tmp", self.0, write_id, HEADER_SUFFIX)),
            dir.join(format!(".{}.{}.{}.tmp", self.0, write_id, BODY_SUFFIX)),
        )
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_url_same_key() {
        let a = CacheKey::from_url("http://example.test/a");
        let b = CacheKey::from_url("http://example.test/a");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_urls_different_keys() {
        assert_ne!(
            CacheKey::from_url("http://example.test/a"),
            CacheKey::from_url("http://example.test/b")
        );
    }

    #[test]
    fn artifact_names_share_digest() {
        let key = CacheKey::from_url("http://example.test/a");
        let dir = Path::new("/tmp/cache");
        let header = key.header_path(dir);
        let body = key.body_path(dir);

        assert_eq!(header.file_stem(), body.file_stem());
        assert_eq!(header.extension().unwrap(), "headers");
        assert_eq!(body.extension().unwrap(), "body");
    }
}
