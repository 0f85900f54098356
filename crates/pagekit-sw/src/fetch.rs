//! Fetch boundary types and the reqwest-backed network client.
//!
//! The router and the interceptor never share memory; the `RemoteFetch`
//! trait is the network seam both sides speak through, and the only one
//! tests need to script.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use thiserror::Error;
use tracing::trace;
use url::Url;

use pagekit_cache::{CacheEntry, CacheKey};

/// Typed failure of a fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("No cached entry")]
    CacheMiss,

    #[error("Body decode failure: {0}")]
    Decode(String),
}

/// How a request reached the fetch boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Fragment, asset or API subresource fetch.
    #[default]
    Subresource,
    /// Top-level document navigation.
    Navigate,
}

/// A request observed at the fetch boundary.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    pub mode: RequestMode,
}

impl FetchRequest {
    /// Create a GET subresource request.
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: None,
            mode: RequestMode::Subresource,
        }
    }

    /// Create a POST request.
    pub fn post(url: Url, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            url,
            headers: HeaderMap::new(),
            body: Some(body),
            mode: RequestMode::Subresource,
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Whether this is a top-level navigation.
    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }
}

/// A fully buffered response.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchedResponse {
    /// Check if the response is a success (2xx).
    pub fn ok(&self) -> bool {
        self.status.is_success()
    }

    /// Get the body as text.
    pub fn text(&self) -> Result<String, FetchFailure> {
        String::from_utf8(self.body.to_vec()).map_err(|e| FetchFailure::Decode(e.to_string()))
    }

    /// Build a response from a cached entry.
    pub fn from_entry(entry: &CacheEntry) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in &entry.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                headers.insert(n, v);
            }
        }
        Self {
            status: StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK),
            headers,
            body: Bytes::from(entry.body.clone()),
        }
    }

    /// Snapshot this response as a cache entry for `key`.
    pub fn to_entry(&self, key: &CacheKey) -> CacheEntry {
        let mut headers = HashMap::new();
        for (name, value) in self.headers.iter() {
            if let Ok(v) = value.to_str() {
                headers.insert(name.as_str().to_string(), v.to_string());
            }
        }
        CacheEntry::new(key, self.status.as_u16(), headers, self.body.to_vec())
    }
}

/// The network side of the fetch boundary.
pub trait RemoteFetch: Send + Sync {
    /// Perform the fetch against the live network.
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, Result<FetchedResponse, FetchFailure>>;
}

/// Network client configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// User agent string.
    pub user_agent: String,
    /// Default request timeout.
    pub timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: "PageKit/1.0".to_string(),
            timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// reqwest-backed network client.
pub struct NetworkClient {
    client: reqwest::Client,
}

impl NetworkClient {
    /// Create a new network client.
    pub fn new(config: NetworkConfig) -> Result<Self, FetchFailure> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| FetchFailure::Network(e.to_string()))?;
        Ok(Self { client })
    }
}

impl RemoteFetch for NetworkClient {
    fn fetch<'a>(
        &'a self,
        request: &'a FetchRequest,
    ) -> BoxFuture<'a, Result<FetchedResponse, FetchFailure>> {
        Box::pin(async move {
            trace!(url = %request.url, method = %request.method, "Network fetch");

            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone());

            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }

            if let Some(ref body) = request.body {
                builder = builder.body(body.clone());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| FetchFailure::Network(e.to_string()))?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| FetchFailure::Network(e.to_string()))?;

            Ok(FetchedResponse {
                status,
                headers,
                body,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let url = Url::parse("https://clinic.example/pages/faq.html").unwrap();
        let request = FetchRequest::get(url.clone()).header(
            HeaderName::from_static("accept"),
            HeaderValue::from_static("text/html"),
        );

        assert_eq!(request.url, url);
        assert_eq!(request.method, Method::GET);
        assert!(!request.is_navigation());
        assert!(request.headers.contains_key("accept"));

        let nav = FetchRequest::navigate(url);
        assert!(nav.is_navigation());
    }

    #[test]
    fn test_response_text_decode_failure() {
        let response = FetchedResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(&[0xff, 0xfe, 0xfd]),
        };
        assert!(matches!(response.text(), Err(FetchFailure::Decode(_))));
    }

    #[test]
    fn test_entry_roundtrip_preserves_parts() {
        let url = Url::parse("https://clinic.example/css/styles.css").unwrap();
        let key = CacheKey::new(Method::GET, url);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/css"),
        );
        let response = FetchedResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(b"body { margin: 0 }"),
        };

        let entry = response.to_entry(&key);
        let rebuilt = FetchedResponse::from_entry(&entry);

        assert_eq!(rebuilt.status, StatusCode::OK);
        assert_eq!(rebuilt.body, response.body);
        assert_eq!(
            rebuilt.headers.get("content-type").and_then(|v| v.to_str().ok()),
            Some("text/css")
        );
    }
}
