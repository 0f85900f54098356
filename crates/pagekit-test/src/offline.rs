//! # Offline Routing Tests
//!
//! The router browsing a fully precached site with the network gone.

use pagekit_router::RouteOutcome;

use crate::Fixture;

/// Offline with a cached fragment: the route renders from cache, not the
/// not-found fallback.
#[tokio::test]
async fn test_offline_route_renders_cached_fragment() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    fixture.net.go_offline();

    let (mut router, sink, _events) = fixture.router();
    router.set_offline(true);

    let outcome = router.init("/").await;

    assert_eq!(outcome, RouteOutcome::Rendered);
    assert_eq!(sink.last().as_deref(), Some("<h1>home</h1>"));
}

/// Offline browsing across several cached routes keeps working.
#[tokio::test]
async fn test_offline_browse_across_routes() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    fixture.net.go_offline();

    let (mut router, sink, _events) = fixture.router();
    router.init("/").await;

    assert_eq!(router.navigate_to("/faq").await, RouteOutcome::Rendered);
    assert_eq!(sink.last().as_deref(), Some("<h1>faq</h1>"));

    assert_eq!(router.navigate_to("/about").await, RouteOutcome::Rendered);
    assert_eq!(sink.last().as_deref(), Some("<h1>about</h1>"));

    // Back/forward replays from cache without new history entries.
    assert_eq!(router.back().await, Some(RouteOutcome::Rendered));
    assert_eq!(sink.last().as_deref(), Some("<h1>faq</h1>"));
    assert_eq!(router.history().length(), 3);
}

/// Offline with nothing cached for the resource: the not-found fallback
/// renders instead of an error reaching the page.
#[tokio::test]
async fn test_offline_missing_fragment_renders_not_found() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;
    fixture.net.go_offline();

    let (mut router, sink, _events) = fixture.router();
    router.init("/").await;
    router.routes.insert("/new", "pages/missing.html");

    let outcome = router.navigate_to("/new").await;

    assert_eq!(outcome, RouteOutcome::NotFound);
    assert!(sink.last().unwrap().contains("Page Not Found"));
    // The failed navigation never entered the history.
    assert_eq!(router.history().current_path(), Some("/"));
}

/// Without any controller installed there is no cache to fall back on;
/// the router still degrades to its local fallback rather than erroring.
#[tokio::test]
async fn test_uncontrolled_offline_page_degrades_to_not_found() {
    let fixture = Fixture::new().await;
    fixture.net.go_offline();

    let (mut router, sink, _events) = fixture.router();
    let outcome = router.init("/").await;

    assert_eq!(outcome, RouteOutcome::NotFound);
    assert!(sink.last().unwrap().contains("Page Not Found"));
}

/// Coming back online, a route renders fresh content again.
#[tokio::test]
async fn test_online_recovery_after_offline_period() {
    let fixture = Fixture::new().await;
    fixture.install("site-v1").await;

    let (mut router, sink, _events) = fixture.router();
    router.init("/").await;

    fixture.net.go_offline();
    router.set_offline(true);
    assert_eq!(router.navigate_to("/faq").await, RouteOutcome::Rendered);

    fixture.net.go_online();
    router.set_offline(false);
    assert_eq!(router.navigate_to("/about").await, RouteOutcome::Rendered);
    assert_eq!(sink.last().as_deref(), Some("<h1>about</h1>"));
}
