//! # Freshness Tests
//!
//! Stale-while-revalidate and network-first behavior through the host.

use std::time::Duration;

use pagekit_cache::{CacheKey, Generation};
use pagekit_sw::{FetchRequest, ServedFrom};

use crate::{scope, Fixture};

fn key(path: &str) -> CacheKey {
    CacheKey::new(http::Method::GET, scope().join(path).unwrap())
}

async fn entry_body(fixture: &Fixture, generation: &Generation, path: &str) -> Option<Vec<u8>> {
    fixture
        .store
        .read()
        .await
        .get(generation, &key(path))
        .map(|e| e.body.clone())
}

/// A cache-first hit returns the stored bytes immediately; the refresh
/// that follows replaces the entry without touching the delivered
/// response.
#[tokio::test]
async fn test_stale_while_revalidate_updates_entry_for_next_time() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    let generation = Generation::new("site-v1");

    // The site deploys new content after install.
    fixture.net.respond("/pages/home.html", 200, b"<h1>home v2</h1>");

    let intercepted = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/pages/home.html").unwrap()))
        .await
        .unwrap();

    // The caller sees the install-time content.
    assert_eq!(intercepted.served_from, ServedFrom::Cache);
    assert_eq!(&intercepted.response.body[..], b"<h1>home</h1>");

    // The background refresh lands shortly after.
    let mut refreshed = false;
    for _ in 0..200 {
        if entry_body(&fixture, &generation, "/pages/home.html").await
            == Some(b"<h1>home v2</h1>".to_vec())
        {
            refreshed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert!(refreshed, "background refresh never landed");

    // The next request serves the refreshed entry.
    let second = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/pages/home.html").unwrap()))
        .await
        .unwrap();
    assert_eq!(&second.response.body[..], b"<h1>home v2</h1>");
}

/// A failed refresh leaves the existing entry untouched.
#[tokio::test]
async fn test_failed_refresh_keeps_cached_entry() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    let generation = Generation::new("site-v1");

    fixture.net.go_offline();

    let intercepted = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/pages/home.html").unwrap()))
        .await
        .unwrap();
    assert_eq!(intercepted.served_from, ServedFrom::Cache);

    // Give the refresh task room to run; the entry must not change.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        entry_body(&fixture, &generation, "/pages/home.html").await,
        Some(b"<h1>home</h1>".to_vec())
    );
}

/// Network-first traffic never serves a stale body while the network
/// works, even with an older entry cached.
#[tokio::test]
async fn test_network_first_is_never_stale_while_online() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;

    fixture.net.respond("/api/slots", 200, b"[1]");
    let first = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/api/slots").unwrap()))
        .await
        .unwrap();
    assert_eq!(first.served_from, ServedFrom::Network);
    assert_eq!(&first.response.body[..], b"[1]");

    // The upstream data changes; the cached copy from the first call
    // must not shadow it.
    fixture.net.respond("/api/slots", 200, b"[1,2]");
    let second = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/api/slots").unwrap()))
        .await
        .unwrap();
    assert_eq!(second.served_from, ServedFrom::Network);
    assert_eq!(&second.response.body[..], b"[1,2]");
}

/// Network-first falls back to the last good response offline.
#[tokio::test]
async fn test_network_first_serves_last_good_response_offline() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;

    fixture.net.respond("/api/slots", 200, b"[7]");
    fixture
        .host
        .intercept(FetchRequest::get(scope().join("/api/slots").unwrap()))
        .await
        .unwrap();

    fixture.net.go_offline();
    let offline = fixture
        .host
        .intercept(FetchRequest::get(scope().join("/api/slots").unwrap()))
        .await
        .unwrap();

    assert_eq!(offline.served_from, ServedFrom::Cache);
    assert_eq!(&offline.response.body[..], b"[7]");
}

/// An offline navigation lands on the precached shell.
#[tokio::test]
async fn test_offline_navigation_serves_shell() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    fixture.net.go_offline();

    let intercepted = fixture
        .host
        .intercept(FetchRequest::navigate(scope().join("/faq").unwrap()))
        .await
        .unwrap();

    assert_eq!(intercepted.served_from, ServedFrom::OfflineShell);
    assert_eq!(&intercepted.response.body[..], b"<html>shell</html>");
}
