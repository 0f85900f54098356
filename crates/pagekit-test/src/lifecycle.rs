//! # Lifecycle Tests
//!
//! Install/activate cycles across the host and the durable store.

use pagekit_cache::{CacheKey, Generation};
use pagekit_sw::{AssetManifest, ControlMessage, WorkerError, WorkerState};

use crate::{scope, Fixture};

fn key(path: &str) -> CacheKey {
    CacheKey::new(http::Method::GET, scope().join(path).unwrap())
}

/// A successful install precaches every manifest asset.
#[tokio::test]
async fn test_install_precaches_whole_manifest() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;

    let store = fixture.store.read().await;
    let generation = Generation::new("site-v1");
    for path in Fixture::manifest().urls() {
        assert!(
            store.get(&generation, &key(path)).is_some(),
            "asset {path} missing after install"
        );
    }
}

/// Re-running an install with every asset reachable converges on the
/// same entry set.
#[tokio::test]
async fn test_reinstall_is_idempotent() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    let first = fixture.store.read().await.len(&Generation::new("site-v1"));

    fixture.install("site-v1").await;
    let second = fixture.store.read().await.len(&Generation::new("site-v1"));

    assert_eq!(first, second);
    assert_eq!(second, Fixture::manifest().len());
}

/// An upgrade waits behind the live generation until told otherwise,
/// and activation deletes everything but the new generation.
#[tokio::test]
async fn test_upgrade_waits_then_takes_over_on_skip_waiting() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    fixture.install("site-v2").await;

    assert_eq!(
        fixture.host.controller_version().await,
        Some(Generation::new("site-v1"))
    );

    fixture
        .host
        .handle_message(ControlMessage::SkipWaiting)
        .await
        .unwrap();

    assert_eq!(
        fixture.host.controller_version().await,
        Some(Generation::new("site-v2"))
    );
    let store = fixture.store.read().await;
    assert!(!store.has(&Generation::new("site-v1")));
    assert!(store.has(&Generation::new("site-v2")));
}

/// A partially unfetchable manifest discards the whole generation; the
/// previous one keeps serving every asset.
#[tokio::test]
async fn test_failed_upgrade_never_activates() {
    let fixture = Fixture::new().await;
    fixture.net.respond("/a", 200, b"a");
    fixture.net.respond("/b", 200, b"b");
    let manifest = AssetManifest::new(["/a", "/b"]);

    fixture.host.install("site-v1", &manifest).await.unwrap();

    fixture.net.fail("/b");
    let result = fixture.host.install("site-v2", &manifest).await;
    assert!(matches!(result, Err(WorkerError::InstallFailed(_))));

    assert_eq!(
        fixture.host.controller_version().await,
        Some(Generation::new("site-v1"))
    );
    let store = fixture.store.read().await;
    let v1 = Generation::new("site-v1");
    assert!(store.get(&v1, &key("/a")).is_some());
    assert!(store.get(&v1, &key("/b")).is_some());
    assert!(!store.has(&Generation::new("site-v2")));
}

/// A discarded install leaves no worker behind; a fresh install cycle is
/// required before anything can activate again.
#[tokio::test]
async fn test_redundant_worker_is_terminal() {
    let fixture = Fixture::new().await;
    fixture.net.fail("/broken");

    let result = fixture
        .host
        .install("site-v1", &AssetManifest::new(["/broken"]))
        .await;
    assert!(matches!(result, Err(WorkerError::InstallFailed(_))));

    let (installing, waiting, active) = fixture.host.worker_states().await;
    assert_eq!(installing, None);
    assert_eq!(waiting, None);
    assert_eq!(active, None);
    assert!(!fixture.host.activate().await.unwrap());

    // A fresh cycle succeeds independently.
    fixture.net.respond("/broken", 200, b"fixed");
    fixture
        .host
        .install("site-v2", &AssetManifest::new(["/broken"]))
        .await
        .unwrap();
    assert_eq!(
        fixture.host.worker_states().await.2,
        Some(WorkerState::Activated)
    );
}

/// The cache survives a process restart: a store reopened on the same
/// directory still serves the precached generation.
#[tokio::test]
async fn test_precached_generation_survives_restart() {
    use pagekit_cache::{CacheStore, StorageConfig};

    let dir = tempfile::tempdir().unwrap();
    let generation = Generation::new("site-v1");

    {
        let store = CacheStore::open(StorageConfig::at(dir.path())).await.unwrap();
        let store = std::sync::Arc::new(tokio::sync::RwLock::new(store));
        let net = std::sync::Arc::new(pagekit_sw::testing::ScriptedNetwork::new());
        net.respond("/", 200, b"<html>shell</html>");
        let (host, _events) = pagekit_sw::ServiceWorkerHost::new(
            scope(),
            std::sync::Arc::clone(&store),
            net as std::sync::Arc<dyn pagekit_sw::RemoteFetch>,
        );
        host.install("site-v1", &AssetManifest::new(["/"]))
            .await
            .unwrap();
    }

    let reopened = CacheStore::open(StorageConfig::at(dir.path())).await.unwrap();
    assert!(reopened.has(&generation));
    assert_eq!(
        reopened.get(&generation, &key("/")).map(|e| e.body.clone()),
        Some(b"<html>shell</html>".to_vec())
    );
}
