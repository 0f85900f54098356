//! # PageKit Cache
//!
//! Generation-scoped response cache for the PageKit offline web runtime.
//!
//! ## Features
//!
//! - **Cache keys**: derived from method + absolute same-origin URL
//! - **Entries**: immutable status/headers/body snapshots, replaced whole
//! - **Generations**: versioned namespaces, swapped and deleted atomically
//! - **Durable storage**: entries persist to disk and survive restarts
//!
//! ## Architecture
//!
//! ```text
//! CacheStore (root dir)
//!     │
//!     ├── Generation "app-v1"  ──  <root>/app-v1/<id>.json
//!     │       └── CacheKey → CacheEntry
//!     │
//!     └── Generation "app-v2"  ──  <root>/app-v2/<id>.json
//!             └── CacheKey → CacheEntry
//! ```

use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

pub mod store;

pub use store::{CacheStore, StorageConfig};

// ==================== Errors ====================

/// Errors that can occur in cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Storage quota exhausted. Callers treat this as a skipped write,
    /// not a failure of the request being served.
    #[error("Quota exceeded: entry of {needed} bytes does not fit")]
    QuotaExceeded { needed: u64 },

    #[error("Unknown generation: {0}")]
    UnknownGeneration(String),

    #[error("Entry format error: {0}")]
    EntryFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Quota errors are recoverable by falling back to the network
    /// response that was going to be cached.
    pub fn is_quota(&self) -> bool {
        matches!(self, CacheError::QuotaExceeded { .. })
    }
}

impl From<CacheError> for pagekit_common::PageKitError {
    fn from(error: CacheError) -> Self {
        pagekit_common::PageKitError::cache(error.to_string())
    }
}

// ==================== Generation ====================

/// A versioned cache namespace. Exactly one generation is current at a
/// time; the rest are garbage awaiting deletion on activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Generation(String);

impl Generation {
    /// Create a generation from a version string.
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    /// The version string naming this generation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Generation {
    fn from(version: &str) -> Self {
        Self::new(version)
    }
}

// ==================== CacheKey ====================

/// Identity of a cacheable request: method plus absolute URL.
///
/// Only idempotent same-origin requests produce keys; everything else is
/// uncacheable and passes straight to the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: Method,
    url: Url,
}

impl CacheKey {
    /// Create a key without any cacheability checks.
    pub fn new(method: Method, url: Url) -> Self {
        Self { method, url }
    }

    /// Derive a key for a request, or `None` if the request is not
    /// cacheable (mutating method, or cross-origin relative to `origin`).
    pub fn for_request(method: &Method, url: &Url, origin: &Url) -> Option<Self> {
        if *method != Method::GET && *method != Method::HEAD {
            return None;
        }
        if url.origin() != origin.origin() {
            return None;
        }
        Some(Self {
            method: method.clone(),
            url: url.clone(),
        })
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Stable on-disk identifier for this key.
    pub fn storage_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(self.url.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

// ==================== CacheEntry ====================

/// A cached request/response pair. Entries are immutable once written;
/// updates replace the whole entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Stored-at timestamp (ms since epoch).
    pub stored_at: u64,
}

impl CacheEntry {
    /// Create an entry for a key from response parts.
    pub fn new(
        key: &CacheKey,
        status: u16,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            url: key.url.to_string(),
            method: key.method.to_string(),
            status,
            headers,
            body,
            stored_at: now_millis(),
        }
    }

    /// Approximate storage footprint in bytes.
    pub fn weight(&self) -> u64 {
        let headers: usize = self
            .headers
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum();
        (self.body.len() + headers + self.url.len()) as u64
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin() -> Url {
        Url::parse("https://clinic.example").unwrap()
    }

    #[test]
    fn test_key_for_get_request() {
        let url = Url::parse("https://clinic.example/pages/home.html").unwrap();
        let key = CacheKey::for_request(&Method::GET, &url, &origin());
        assert!(key.is_some());
    }

    #[test]
    fn test_key_rejects_mutating_methods() {
        let url = Url::parse("https://clinic.example/api/book").unwrap();
        assert!(CacheKey::for_request(&Method::POST, &url, &origin()).is_none());
        assert!(CacheKey::for_request(&Method::DELETE, &url, &origin()).is_none());
        assert!(CacheKey::for_request(&Method::PUT, &url, &origin()).is_none());
    }

    #[test]
    fn test_key_rejects_cross_origin() {
        let url = Url::parse("https://cdn.other.example/lib.js").unwrap();
        assert!(CacheKey::for_request(&Method::GET, &url, &origin()).is_none());
    }

    #[test]
    fn test_storage_id_is_stable_and_distinct() {
        let a = CacheKey::new(
            Method::GET,
            Url::parse("https://clinic.example/a").unwrap(),
        );
        let b = CacheKey::new(
            Method::GET,
            Url::parse("https://clinic.example/b").unwrap(),
        );
        assert_eq!(a.storage_id(), a.storage_id());
        assert_ne!(a.storage_id(), b.storage_id());
    }

    #[test]
    fn test_error_folds_into_umbrella_error() {
        let error = CacheError::UnknownGeneration("v9".into());
        let folded = pagekit_common::PageKitError::from(error);
        assert_eq!(folded.category(), "cache");
    }

    #[test]
    fn test_entry_weight_counts_body_and_headers() {
        let key = CacheKey::new(
            Method::GET,
            Url::parse("https://clinic.example/x").unwrap(),
        );
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());
        let entry = CacheEntry::new(&key, 200, headers, vec![0u8; 64]);
        assert!(entry.weight() >= 64);
    }
}
