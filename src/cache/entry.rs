//! Validators and the serialized header artifact.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

/// Revalidation data remembered for a cached URL.
///
/// Never stored with both fields empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(rename = "last-modified", skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl ValidatorEntry {
    /// Extract `ETag` / `Last-Modified` from an origin response.
    ///
    /// Returns `None` when neither is present, meaning the response cannot be
    /// revalidated and must not be cached.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &HeaderName| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let entry = Self {
            etag: read(&header::ETAG),
            last_modified: read(&header::LAST_MODIFIED),
        };
        if entry.etag.is_none() && entry.last_modified.is_none() {
            None
        } else {
            Some(entry)
        }
    }

    /// Add the matching conditional-request headers to an outgoing request.
    ///
    /// Any conditional headers the client sent are replaced so the 304/200
    /// decision refers to the proxy's copy.
    pub fn apply_to(&self, headers: &mut HeaderMap) {
        headers.remove(header::IF_NONE_MATCH);
        headers.remove(header::IF_MODIFIED_SINCE);
        if let Some(value) = self.etag.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::IF_NONE_MATCH, value);
        }
        if let Some(value) = self
            .last_modified
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert(header::IF_MODIFIED_SINCE, value);
        }
    }
}

/// On-disk form of the cached response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderBlob {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl HeaderBlob {
    pub fn new(url: &str, headers: &HeaderMap) -> Self {
        let headers = headers
            .iter()
            .filter_map(|(name, value)| match value.to_str() {
                Ok(value) => Some((name.as_str().to_string(), value.to_string())),
                Err(_) => {
                    tracing::debug!(header = %name, "Skipping non-text header in cache artifact");
                    None
                }
            })
            .collect();
        Self {
            url: url.to_string(),
            headers,
        }
    }

    /// Rebuild a header map, skipping entries that no longer parse.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_validators_not_cacheable() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        assert!(ValidatorEntry::from_headers(&headers).is_none());
    }

    #[test]
    fn either_validator_is_enough() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        let entry = ValidatorEntry::from_headers(&headers).unwrap();
        assert_eq!(entry.etag, None);
        assert_eq!(entry.last_modified.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[test]
    fn applies_conditional_headers() {
        let entry = ValidatorEntry {
            etag: Some("\"x1\"".into()),
            last_modified: Some("Wed, 21 Oct 2015 07:28:00 GMT".into()),
        };
        let mut headers = HeaderMap::new();
        headers.insert(header::IF_NONE_MATCH, HeaderValue::from_static("\"client\""));
        entry.apply_to(&mut headers);

        assert_eq!(headers[header::IF_NONE_MATCH], "\"x1\"");
        assert_eq!(headers[header::IF_MODIFIED_SINCE], "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(headers.get_all(header::IF_NONE_MATCH).iter().count(), 1);
    }

    #[test]
    fn header_blob_keeps_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));
        headers.insert(header::ETAG, HeaderValue::from_static("\"x1\""));

        let json = serde_json::to_string(&HeaderBlob::new("http://example.test/a", &headers)).unwrap();
        let blob: HeaderBlob = serde_json::from_str(&json).unwrap();
        let restored = blob.to_header_map();

        assert_eq!(blob.url, "http://example.test/a");
        assert_eq!(restored.get_all(header::SET_COOKIE).iter().count(), 2);
        assert_eq!(restored[header::ETAG], "\"x1\"");
    }
}
