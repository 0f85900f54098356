//! Request classification and interception strategies.
//!
//! Every request from a controlled page goes through `intercept`, which
//! picks one of three strategies:
//!
//! - **Network-first** (navigations and API paths): live response wins,
//!   cache is the fallback.
//! - **Cache-first** (static assets and fragments): cached response wins,
//!   a background refresh keeps the entry current for next time.
//! - **Pass-through** (mutating methods, cross-origin): never cached.

use std::sync::Arc;

use http::{HeaderValue, Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

use pagekit_cache::{CacheKey, CacheStore, Generation};

use crate::fetch::{FetchFailure, FetchRequest, FetchedResponse, RemoteFetch};

/// Strategy selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Live network preferred, cache on failure.
    NetworkFirst,
    /// Cached response preferred, refreshed in the background.
    CacheFirst,
    /// Straight to the network, no caching.
    PassThrough,
}

/// Where an intercepted response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
    /// Live network response.
    Network,
    /// Cached entry.
    Cache,
    /// Cached application shell, served for an offline navigation.
    OfflineShell,
    /// Generic offline placeholder.
    OfflineFallback,
    /// Uncached pass-through.
    PassThrough,
}

/// A response plus its provenance.
#[derive(Debug, Clone)]
pub struct InterceptedResponse {
    pub response: FetchedResponse,
    pub served_from: ServedFrom,
}

/// Interception policy: which requests belong to which strategy.
#[derive(Debug, Clone)]
pub struct InterceptPolicy {
    /// Origin whose requests are eligible for caching.
    origin: Url,
    /// Path prefixes routed network-first (API traffic).
    api_prefixes: Vec<String>,
    /// Path of the cached application shell used as offline navigation
    /// fallback.
    shell_path: String,
}

impl InterceptPolicy {
    /// Create a policy for an origin with the default `/api/` prefix.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            api_prefixes: vec!["/api/".to_string()],
            shell_path: "/".to_string(),
        }
    }

    /// Replace the network-first path prefixes.
    pub fn with_api_prefixes(mut self, prefixes: impl IntoIterator<Item = String>) -> Self {
        self.api_prefixes = prefixes.into_iter().collect();
        self
    }

    /// Set the offline shell path.
    pub fn with_shell_path(mut self, path: impl Into<String>) -> Self {
        self.shell_path = path.into();
        self
    }

    /// The controlled origin.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Classify a request. Anything that cannot produce a cache key
    /// (mutating method, cross-origin) passes straight through.
    pub fn classify(&self, request: &FetchRequest) -> RequestClass {
        if CacheKey::for_request(&request.method, &request.url, &self.origin).is_none() {
            return RequestClass::PassThrough;
        }
        let path = request.url.path();
        if request.is_navigation() || self.api_prefixes.iter().any(|p| path.starts_with(p)) {
            return RequestClass::NetworkFirst;
        }
        RequestClass::CacheFirst
    }

    /// Cache key of the application shell.
    fn shell_key(&self) -> Option<CacheKey> {
        let url = self.origin.join(&self.shell_path).ok()?;
        Some(CacheKey::new(Method::GET, url))
    }
}

/// The fetch interceptor for one activated generation.
pub struct FetchInterceptor {
    policy: InterceptPolicy,
    generation: Generation,
    store: Arc<RwLock<CacheStore>>,
    net: Arc<dyn RemoteFetch>,
}

impl FetchInterceptor {
    /// Create an interceptor serving from `generation`.
    pub fn new(
        policy: InterceptPolicy,
        generation: Generation,
        store: Arc<RwLock<CacheStore>>,
        net: Arc<dyn RemoteFetch>,
    ) -> Self {
        Self {
            policy,
            generation,
            store,
            net,
        }
    }

    /// The generation this interceptor serves from.
    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    /// Intercept one request.
    ///
    /// Cache-first and network-first requests never fail: their worst
    /// case is an offline placeholder. Pass-through requests surface
    /// network failures to the caller untouched.
    pub async fn intercept(
        &self,
        request: FetchRequest,
    ) -> Result<InterceptedResponse, FetchFailure> {
        let class = self.policy.classify(&request);
        trace!(url = %request.url, ?class, "Intercepting request");

        match class {
            RequestClass::PassThrough => {
                let response = self.net.fetch(&request).await?;
                Ok(InterceptedResponse {
                    response,
                    served_from: ServedFrom::PassThrough,
                })
            }
            RequestClass::NetworkFirst => Ok(self.network_first(request).await),
            RequestClass::CacheFirst => Ok(self.cache_first(request).await),
        }
    }

    /// Network-first: live response wins; cache, then the shell, then the
    /// offline placeholder back it up.
    async fn network_first(&self, request: FetchRequest) -> InterceptedResponse {
        let key = CacheKey::new(request.method.clone(), request.url.clone());

        match self.net.fetch(&request).await {
            Ok(response) => {
                if response.ok() {
                    self.store_entry(&key, &response).await;
                }
                InterceptedResponse {
                    response,
                    served_from: ServedFrom::Network,
                }
            }
            Err(error) => {
                debug!(url = %request.url, %error, "Network-first fetch failed, consulting cache");

                let store = self.store.read().await;
                if let Some(entry) = store.get(&self.generation, &key) {
                    return InterceptedResponse {
                        response: FetchedResponse::from_entry(entry),
                        served_from: ServedFrom::Cache,
                    };
                }

                if request.is_navigation() {
                    if let Some(shell) = self
                        .policy
                        .shell_key()
                        .and_then(|k| store.get(&self.generation, &k))
                    {
                        return InterceptedResponse {
                            response: FetchedResponse::from_entry(shell),
                            served_from: ServedFrom::OfflineShell,
                        };
                    }
                }

                InterceptedResponse {
                    response: offline_response(),
                    served_from: ServedFrom::OfflineFallback,
                }
            }
        }
    }

    /// Cache-first with stale-while-revalidate: a hit is returned
    /// immediately and refreshed in the background; a miss goes to the
    /// network and is stored on success.
    async fn cache_first(&self, request: FetchRequest) -> InterceptedResponse {
        let key = CacheKey::new(request.method.clone(), request.url.clone());

        let cached = {
            let store = self.store.read().await;
            store
                .get(&self.generation, &key)
                .map(FetchedResponse::from_entry)
        };

        if let Some(response) = cached {
            self.spawn_refresh(request, key);
            return InterceptedResponse {
                response,
                served_from: ServedFrom::Cache,
            };
        }

        match self.net.fetch(&request).await {
            Ok(response) => {
                if response.ok() {
                    self.store_entry(&key, &response).await;
                }
                InterceptedResponse {
                    response,
                    served_from: ServedFrom::Network,
                }
            }
            Err(error) => {
                debug!(url = %request.url, %error, "Cache miss and network failure, serving placeholder");
                InterceptedResponse {
                    response: offline_response(),
                    served_from: ServedFrom::OfflineFallback,
                }
            }
        }
    }

    /// Cache-only lookup, bypassing the network entirely.
    pub async fn cached_response(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchFailure> {
        let key = CacheKey::new(request.method.clone(), request.url.clone());
        self.store
            .read()
            .await
            .get(&self.generation, &key)
            .map(FetchedResponse::from_entry)
            .ok_or(FetchFailure::CacheMiss)
    }

    /// Fire-and-forget refresh of a cached entry. The original caller
    /// already has its response; a later overwrite only affects the next
    /// request, and concurrent refreshes are last-writer-wins.
    fn spawn_refresh(&self, request: FetchRequest, key: CacheKey) {
        let net = Arc::clone(&self.net);
        let store = Arc::clone(&self.store);
        let generation = self.generation.clone();

        tokio::spawn(async move {
            match net.fetch(&request).await {
                Ok(response) if response.ok() => {
                    let entry = response.to_entry(&key);
                    if let Err(error) = store.write().await.put(&generation, &key, entry).await {
                        warn!(%key, %error, "Background refresh not stored");
                    } else {
                        trace!(%key, "Background refresh stored");
                    }
                }
                Ok(response) => {
                    trace!(%key, status = %response.status, "Background refresh skipped");
                }
                Err(error) => {
                    trace!(%key, %error, "Background refresh failed");
                }
            }
        });
    }

    /// Store a successful response, treating quota exhaustion as a
    /// skipped write rather than a failure.
    async fn store_entry(&self, key: &CacheKey, response: &FetchedResponse) {
        let entry = response.to_entry(key);
        if let Err(error) = self.store.write().await.put(&self.generation, key, entry).await {
            warn!(%key, %error, "Response served but not cached");
        }
    }
}

/// The static offline placeholder served when both the network and the
/// cache come up empty.
fn offline_response() -> FetchedResponse {
    let mut headers = http::HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    FetchedResponse {
        status: StatusCode::SERVICE_UNAVAILABLE,
        headers,
        body: bytes::Bytes::from_static(b"Offline - no cached copy available"),
    }
}
