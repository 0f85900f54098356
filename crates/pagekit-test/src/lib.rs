//! # PageKit Test
//!
//! Cross-crate scenario tests for the PageKit runtime: lifecycle,
//! offline routing, and cache freshness, exercised through the same
//! fetch boundary a running page would use.
//!
//! The fixtures wire a [`pagekit_router::Router`] to a
//! [`pagekit_sw::ServiceWorkerHost`] the only way the real system does:
//! the router's fragment fetches become intercepted requests. The two
//! components share no state besides that boundary.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use url::Url;

use pagekit_cache::{CacheStore, StorageConfig};
use pagekit_router::{
    ContentSink, FragmentError, FragmentSource, RouteTable, Router, RouterConfig, RouterEvent,
};
use pagekit_sw::testing::ScriptedNetwork;
use pagekit_sw::{AssetManifest, FetchRequest, ServiceWorkerHost};

pub mod freshness;
pub mod lifecycle;
pub mod offline;

/// The origin all fixtures run against.
pub fn scope() -> Url {
    Url::parse("https://clinic.example/").unwrap()
}

/// Fragment source backed by an interceptor host: every fragment fetch
/// crosses the network boundary and is subject to interception policy.
pub struct InterceptedFragmentSource {
    host: Arc<ServiceWorkerHost>,
}

impl InterceptedFragmentSource {
    pub fn new(host: Arc<ServiceWorkerHost>) -> Arc<Self> {
        Arc::new(Self { host })
    }
}

impl FragmentSource for InterceptedFragmentSource {
    fn fetch_fragment<'a>(
        &'a self,
        resource: &'a str,
    ) -> BoxFuture<'a, Result<String, FragmentError>> {
        Box::pin(async move {
            let url = self
                .host
                .scope()
                .join(resource)
                .map_err(|e| FragmentError::Network(e.to_string()))?;

            match self.host.intercept(FetchRequest::get(url)).await {
                Ok(intercepted) if intercepted.response.ok() => intercepted
                    .response
                    .text()
                    .map_err(|e| FragmentError::Decode(e.to_string())),
                Ok(_) => Err(FragmentError::NotFound),
                Err(e) => Err(FragmentError::Network(e.to_string())),
            }
        })
    }
}

/// Content sink that records every swap.
#[derive(Default)]
pub struct CollectingSink {
    swaps: Mutex<Vec<String>>,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recent content.
    pub fn last(&self) -> Option<String> {
        self.swaps.lock().unwrap().last().cloned()
    }

    /// Number of swaps so far.
    pub fn swap_count(&self) -> usize {
        self.swaps.lock().unwrap().len()
    }
}

impl ContentSink for CollectingSink {
    fn replace(&self, html: &str) {
        self.swaps.lock().unwrap().push(html.to_string());
    }
}

/// A full runtime fixture: scripted network, durable store, worker host.
pub struct Fixture {
    pub net: Arc<ScriptedNetwork>,
    pub store: Arc<RwLock<CacheStore>>,
    pub host: Arc<ServiceWorkerHost>,
    // Holds the store directory alive for the fixture's lifetime.
    _dir: tempfile::TempDir,
}

impl Fixture {
    /// Create a fixture with an empty cache and an online scripted
    /// network serving the default site.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(StorageConfig::at(dir.path())).await.unwrap();
        let store = Arc::new(RwLock::new(store));

        let net = Arc::new(ScriptedNetwork::new());
        net.respond("/", 200, b"<html>shell</html>");
        net.respond("/css/styles.css", 200, b"body{margin:0}");
        net.respond("/pages/home.html", 200, b"<h1>home</h1>");
        net.respond("/pages/faq.html", 200, b"<h1>faq</h1>");
        net.respond("/pages/about.html", 200, b"<h1>about</h1>");

        let (host, _events) = ServiceWorkerHost::new(
            scope(),
            Arc::clone(&store),
            Arc::clone(&net) as Arc<dyn pagekit_sw::RemoteFetch>,
        );

        Self {
            net,
            store,
            host: Arc::new(host),
            _dir: dir,
        }
    }

    /// The manifest every page of the default site needs offline.
    pub fn manifest() -> AssetManifest {
        AssetManifest::new([
            "/",
            "/css/styles.css",
            "/pages/home.html",
            "/pages/faq.html",
            "/pages/about.html",
        ])
    }

    /// Install and activate the given version.
    pub async fn install(&self, version: &str) {
        self.host.install(version, &Self::manifest()).await.unwrap();
    }

    /// Build a router whose fragment fetches go through the host.
    pub fn router(
        &self,
    ) -> (
        Router,
        Arc<CollectingSink>,
        tokio::sync::mpsc::UnboundedReceiver<RouterEvent>,
    ) {
        let routes = RouteTable::new("/", "pages/home.html")
            .route("/faq", "pages/faq.html")
            .route("/about", "pages/about.html");

        let config = RouterConfig {
            transition: std::time::Duration::ZERO,
            ..Default::default()
        };

        let sink = CollectingSink::new();
        let source = InterceptedFragmentSource::new(Arc::clone(&self.host));
        let (router, events) = Router::new(
            config,
            routes,
            source,
            Arc::clone(&sink) as Arc<dyn ContentSink>,
        );
        (router, sink, events)
    }
}
