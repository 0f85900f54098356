//! # PageKit SW
//!
//! Worker lifecycle and fetch interception for the PageKit offline web
//! runtime.
//!
//! ## Features
//!
//! - **Lifecycle**: install, waiting, activate, skip-waiting, retirement
//! - **Atomic install**: a generation activates fully precached or not at all
//! - **Fetch interception**: network-first, cache-first + background refresh
//! - **Offline fallbacks**: cached shell or static placeholder, never an error
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     │
//!     ├── Registration
//!     │       ├── installing (Worker)
//!     │       ├── waiting (Worker)
//!     │       └── active (Worker) ── the only one serving intercept()
//!     │
//!     ├── FetchInterceptor ── strategy per RequestClass
//!     │
//!     └── CacheStore
//!             └── Generation "app-v2" (current) / older → deleted on activate
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use pagekit_cache::{CacheError, CacheKey, CacheStore, Generation};

pub mod fetch;
pub mod intercept;
pub mod testing;

pub use fetch::{
    FetchFailure, FetchRequest, FetchedResponse, NetworkClient, NetworkConfig, RemoteFetch,
    RequestMode,
};
pub use intercept::{
    FetchInterceptor, InterceptPolicy, InterceptedResponse, RequestClass, ServedFrom,
};

// ==================== Errors ====================

/// Errors that can occur in worker operations.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("No active worker is controlling this scope")]
    NoController,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Fetch failure: {0}")]
    Fetch(#[from] FetchFailure),
}

impl From<WorkerError> for pagekit_common::PageKitError {
    fn from(error: WorkerError) -> Self {
        pagekit_common::PageKitError::worker(error.to_string())
    }
}

// ==================== Types ====================

/// Unique identifier for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Installing: precaching the manifest into a fresh generation.
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating: pruning older generations.
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Redundant (replaced or install failed). Terminal.
    Redundant,
}

impl WorkerState {
    /// Check if this state serves intercepted traffic.
    pub fn can_intercept(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerState::Redundant)
    }
}

/// One versioned worker instance.
#[derive(Debug, Clone)]
pub struct Worker {
    /// Unique ID.
    pub id: WorkerId,

    /// The cache generation this worker owns.
    pub version: Generation,

    /// Current state.
    pub state: WorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,
}

impl Worker {
    /// Create a new worker for a generation.
    pub fn new(version: Generation) -> Self {
        Self {
            id: WorkerId::new(),
            version,
            state: WorkerState::Installing,
            error: None,
            state_changed_at: Instant::now(),
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }

    /// Check if active.
    pub fn is_active(&self) -> bool {
        self.state == WorkerState::Activated
    }

    /// Check if redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == WorkerState::Redundant
    }
}

/// Ordered list of URLs that must be present in a generation before it
/// may activate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetManifest {
    urls: Vec<String>,
}

impl AssetManifest {
    /// Create a manifest from asset paths.
    pub fn new(urls: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// The asset paths, in order.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// Whether the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// Control signal a page can send to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Skip the waiting period and activate immediately.
    SkipWaiting,
}

/// Lifecycle events.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A worker changed state.
    StateChange {
        worker: WorkerId,
        state: WorkerState,
    },
    /// A new generation took control of the scope.
    ControllerChange { version: Generation },
    /// An install was discarded.
    InstallFailed {
        version: Generation,
        error: String,
    },
}

// ==================== Registration ====================

/// Registration for one scope: at most one worker per lifecycle slot.
#[derive(Debug, Default)]
pub struct Registration {
    /// Worker currently precaching.
    pub installing: Option<Worker>,

    /// Worker installed and waiting to take over.
    pub waiting: Option<Worker>,

    /// Worker controlling the scope.
    pub active: Option<Worker>,
}

impl Registration {
    /// The generation currently serving traffic.
    pub fn controller(&self) -> Option<&Worker> {
        self.active.as_ref().filter(|w| w.is_active())
    }
}

// ==================== Host ====================

/// The worker host for one scope: owns the registration, the cache store
/// and the interception policy.
pub struct ServiceWorkerHost {
    scope: Url,
    policy: InterceptPolicy,
    store: Arc<RwLock<CacheStore>>,
    net: Arc<dyn RemoteFetch>,
    registration: RwLock<Registration>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ServiceWorkerHost {
    /// Create a host for a scope.
    pub fn new(
        scope: Url,
        store: Arc<RwLock<CacheStore>>,
        net: Arc<dyn RemoteFetch>,
    ) -> (Self, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let policy = InterceptPolicy::new(scope.clone());
        (
            Self {
                scope,
                policy,
                store,
                net,
                registration: RwLock::new(Registration::default()),
                event_tx,
            },
            event_rx,
        )
    }

    /// Replace the interception policy.
    pub fn set_policy(&mut self, policy: InterceptPolicy) {
        self.policy = policy;
    }

    /// The controlled scope.
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Install a new worker version: precache the whole manifest into a
    /// fresh generation. Any failed asset discards the generation and the
    /// worker; a previously active generation stays authoritative.
    ///
    /// When nothing controls the scope yet, the new worker activates
    /// immediately; otherwise it waits.
    pub async fn install(
        &self,
        version: &str,
        manifest: &AssetManifest,
    ) -> Result<(), WorkerError> {
        let generation = Generation::new(version);
        let worker = Worker::new(generation.clone());
        let worker_id = worker.id;

        info!(%generation, assets = manifest.len(), "Installing worker");
        self.send_state(worker_id, WorkerState::Installing);
        self.registration.write().await.installing = Some(worker);

        self.store
            .write()
            .await
            .open_generation(&generation)
            .await?;

        if let Err(error) = self.precache(&generation, manifest).await {
            warn!(%generation, %error, "Install failed, discarding generation");
            self.store
                .write()
                .await
                .delete_generation(&generation)
                .await?;

            let mut registration = self.registration.write().await;
            if let Some(mut failed) = registration.installing.take() {
                failed.error = Some(error.clone());
                failed.set_state(WorkerState::Redundant);
                self.send_state(worker_id, WorkerState::Redundant);
            }
            let _ = self.event_tx.send(WorkerEvent::InstallFailed {
                version: generation,
                error: error.clone(),
            });
            return Err(WorkerError::InstallFailed(error));
        }

        let takes_over_now = {
            let mut registration = self.registration.write().await;
            if let Some(mut superseded) = registration.waiting.take() {
                superseded.set_state(WorkerState::Redundant);
                self.send_state(superseded.id, WorkerState::Redundant);
            }
            if let Some(mut worker) = registration.installing.take() {
                worker.set_state(WorkerState::Installed);
                self.send_state(worker_id, WorkerState::Installed);
                registration.waiting = Some(worker);
            }
            registration.active.is_none()
        };

        info!(%version, "Worker installed");

        if takes_over_now {
            self.activate().await?;
        }
        Ok(())
    }

    async fn precache(
        &self,
        generation: &Generation,
        manifest: &AssetManifest,
    ) -> Result<(), String> {
        for path in manifest.urls() {
            let url = self
                .scope
                .join(path)
                .map_err(|e| format!("bad manifest URL {path}: {e}"))?;
            let request = FetchRequest::get(url.clone());

            let response = self
                .net
                .fetch(&request)
                .await
                .map_err(|e| format!("{path}: {e}"))?;
            if !response.ok() {
                return Err(format!("{path}: HTTP {}", response.status));
            }

            let key = CacheKey::new(http::Method::GET, url);
            self.store
                .write()
                .await
                .put(generation, &key, response.to_entry(&key))
                .await
                .map_err(|e| format!("{path}: {e}"))?;

            debug!(%generation, %path, "Precached asset");
        }
        Ok(())
    }

    /// Promote the waiting worker: prune every other generation and take
    /// control of the scope. Returns `false` when no worker is waiting.
    pub async fn activate(&self) -> Result<bool, WorkerError> {
        let mut registration = self.registration.write().await;
        let Some(mut worker) = registration.waiting.take() else {
            return Ok(false);
        };

        worker.set_state(WorkerState::Activating);
        self.send_state(worker.id, WorkerState::Activating);

        if let Some(mut old) = registration.active.take() {
            old.set_state(WorkerState::Redundant);
            self.send_state(old.id, WorkerState::Redundant);
        }

        self.store
            .write()
            .await
            .retain_only(&worker.version)
            .await?;

        worker.set_state(WorkerState::Activated);
        self.send_state(worker.id, WorkerState::Activated);
        let _ = self.event_tx.send(WorkerEvent::ControllerChange {
            version: worker.version.clone(),
        });

        info!(version = %worker.version, "Worker activated");
        registration.active = Some(worker);
        Ok(true)
    }

    /// Handle a control message from a page.
    pub async fn handle_message(&self, message: ControlMessage) -> Result<(), WorkerError> {
        match message {
            ControlMessage::SkipWaiting => {
                debug!("Skip-waiting requested");
                self.activate().await?;
                Ok(())
            }
        }
    }

    /// The generation currently controlling the scope.
    pub async fn controller_version(&self) -> Option<Generation> {
        self.registration
            .read()
            .await
            .controller()
            .map(|w| w.version.clone())
    }

    /// State of the worker in each lifecycle slot, for diagnostics.
    pub async fn worker_states(&self) -> (Option<WorkerState>, Option<WorkerState>, Option<WorkerState>) {
        let registration = self.registration.read().await;
        (
            registration.installing.as_ref().map(|w| w.state),
            registration.waiting.as_ref().map(|w| w.state),
            registration.active.as_ref().map(|w| w.state),
        )
    }

    /// Intercept one request on behalf of a controlled page. Fails with
    /// `NoController` unless a worker is activated for the scope.
    pub async fn intercept(
        &self,
        request: FetchRequest,
    ) -> Result<InterceptedResponse, WorkerError> {
        let version = self
            .controller_version()
            .await
            .ok_or(WorkerError::NoController)?;

        let interceptor = FetchInterceptor::new(
            self.policy.clone(),
            version,
            Arc::clone(&self.store),
            Arc::clone(&self.net),
        );
        Ok(interceptor.intercept(request).await?)
    }

    fn send_state(&self, worker: WorkerId, state: WorkerState) {
        let _ = self.event_tx.send(WorkerEvent::StateChange { worker, state });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedNetwork;
    use pagekit_cache::StorageConfig;

    fn scope() -> Url {
        Url::parse("https://clinic.example/").unwrap()
    }

    fn manifest() -> AssetManifest {
        AssetManifest::new(["/", "/css/styles.css", "/pages/home.html"])
    }

    async fn host_with(
        net: Arc<ScriptedNetwork>,
        dir: &tempfile::TempDir,
    ) -> (
        ServiceWorkerHost,
        mpsc::UnboundedReceiver<WorkerEvent>,
        Arc<RwLock<CacheStore>>,
    ) {
        let store = CacheStore::open(StorageConfig::at(dir.path())).await.unwrap();
        let store = Arc::new(RwLock::new(store));
        let (host, events) = ServiceWorkerHost::new(scope(), Arc::clone(&store), net);
        (host, events, store)
    }

    fn seed_network(net: &ScriptedNetwork) {
        net.respond("/", 200, b"<html>shell</html>");
        net.respond("/css/styles.css", 200, b"body{}");
        net.respond("/pages/home.html", 200, b"<h1>home</h1>");
    }

    #[test]
    fn test_worker_state_predicates() {
        assert!(WorkerState::Activated.can_intercept());
        assert!(!WorkerState::Installed.can_intercept());
        assert!(WorkerState::Redundant.is_terminal());
        assert!(!WorkerState::Activating.is_terminal());
    }

    #[tokio::test]
    async fn test_install_precaches_manifest_and_activates() {
        let net = Arc::new(ScriptedNetwork::new());
        seed_network(&net);

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, store) = host_with(Arc::clone(&net), &dir).await;

        host.install("app-v1", &manifest()).await.unwrap();

        // No prior controller, so the new worker takes over directly.
        assert_eq!(
            host.controller_version().await,
            Some(Generation::new("app-v1"))
        );

        let store = store.read().await;
        let generation = Generation::new("app-v1");
        for path in manifest().urls() {
            let key = CacheKey::new(http::Method::GET, scope().join(path).unwrap());
            assert!(
                store.get(&generation, &key).is_some(),
                "missing precached asset {path}"
            );
        }
    }

    #[tokio::test]
    async fn test_install_is_idempotent() {
        let net = Arc::new(ScriptedNetwork::new());
        seed_network(&net);

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, store) = host_with(Arc::clone(&net), &dir).await;

        host.install("app-v1", &manifest()).await.unwrap();
        host.install("app-v1", &manifest()).await.unwrap();

        let store = store.read().await;
        assert_eq!(store.len(&Generation::new("app-v1")), manifest().len());
    }

    #[tokio::test]
    async fn test_failed_install_discards_generation() {
        let net = Arc::new(ScriptedNetwork::new());
        net.respond("/a", 200, b"a");
        net.fail("/b");

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, store) = host_with(Arc::clone(&net), &dir).await;

        let result = host
            .install("app-v1", &AssetManifest::new(["/a", "/b"]))
            .await;

        assert!(matches!(result, Err(WorkerError::InstallFailed(_))));
        assert!(host.controller_version().await.is_none());
        assert!(!store.read().await.has(&Generation::new("app-v1")));
    }

    #[tokio::test]
    async fn test_failed_upgrade_leaves_previous_generation_serving() {
        let net = Arc::new(ScriptedNetwork::new());
        net.respond("/a", 200, b"a");
        net.respond("/b", 200, b"b");

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, store) = host_with(Arc::clone(&net), &dir).await;
        let two_assets = AssetManifest::new(["/a", "/b"]);

        host.install("app-v1", &two_assets).await.unwrap();

        // The upgrade hits a dead network on /b.
        net.fail("/b");
        let result = host.install("app-v2", &two_assets).await;
        assert!(matches!(result, Err(WorkerError::InstallFailed(_))));

        // v1 still controls and still has both assets.
        assert_eq!(
            host.controller_version().await,
            Some(Generation::new("app-v1"))
        );
        let generation = Generation::new("app-v1");
        let store = store.read().await;
        for path in ["/a", "/b"] {
            let key = CacheKey::new(http::Method::GET, scope().join(path).unwrap());
            assert!(store.get(&generation, &key).is_some());
        }
        assert!(!store.has(&Generation::new("app-v2")));
    }

    #[tokio::test]
    async fn test_new_version_waits_until_skip_waiting() {
        let net = Arc::new(ScriptedNetwork::new());
        seed_network(&net);

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, store) = host_with(Arc::clone(&net), &dir).await;

        host.install("app-v1", &manifest()).await.unwrap();
        host.install("app-v2", &manifest()).await.unwrap();

        // v2 installed but v1 still controls.
        assert_eq!(
            host.controller_version().await,
            Some(Generation::new("app-v1"))
        );
        let (_, waiting, active) = host.worker_states().await;
        assert_eq!(waiting, Some(WorkerState::Installed));
        assert_eq!(active, Some(WorkerState::Activated));

        host.handle_message(ControlMessage::SkipWaiting).await.unwrap();

        assert_eq!(
            host.controller_version().await,
            Some(Generation::new("app-v2"))
        );
        // Activation pruned the old generation.
        let store = store.read().await;
        assert!(!store.has(&Generation::new("app-v1")));
        assert!(store.has(&Generation::new("app-v2")));
    }

    #[tokio::test]
    async fn test_activate_without_waiting_worker_is_noop() {
        let net = Arc::new(ScriptedNetwork::new());
        let dir = tempfile::tempdir().unwrap();
        let (host, _events, _store) = host_with(Arc::clone(&net), &dir).await;

        assert!(!host.activate().await.unwrap());
        assert!(host.controller_version().await.is_none());
    }

    #[tokio::test]
    async fn test_intercept_requires_active_controller() {
        let net = Arc::new(ScriptedNetwork::new());
        let dir = tempfile::tempdir().unwrap();
        let (host, _events, _store) = host_with(Arc::clone(&net), &dir).await;

        let request = FetchRequest::get(scope().join("/pages/home.html").unwrap());
        let result = host.intercept(request).await;
        assert!(matches!(result, Err(WorkerError::NoController)));
    }

    #[tokio::test]
    async fn test_intercept_serves_precached_assets_offline() {
        let net = Arc::new(ScriptedNetwork::new());
        seed_network(&net);

        let dir = tempfile::tempdir().unwrap();
        let (host, _events, _store) = host_with(Arc::clone(&net), &dir).await;
        host.install("app-v1", &manifest()).await.unwrap();

        net.go_offline();

        let request = FetchRequest::get(scope().join("/pages/home.html").unwrap());
        let result = host.intercept(request).await.unwrap();
        assert_eq!(result.served_from, ServedFrom::Cache);
        assert_eq!(&result.response.body[..], b"<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_emitted_in_order() {
        let net = Arc::new(ScriptedNetwork::new());
        seed_network(&net);

        let dir = tempfile::tempdir().unwrap();
        let (host, mut events, _store) = host_with(Arc::clone(&net), &dir).await;
        host.install("app-v1", &manifest()).await.unwrap();

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let WorkerEvent::StateChange { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![
                WorkerState::Installing,
                WorkerState::Installed,
                WorkerState::Activating,
                WorkerState::Activated,
            ]
        );
    }
}
