//! # PageKit Router
//!
//! Client-side fragment router for the PageKit offline web runtime.
//!
//! ## Features
//!
//! - **Route table**: logical paths mapped to fragment resources, with a
//!   default entry that always resolves
//! - **Session history**: push/replace/back/forward without duplicates
//! - **Timed transitions**: fade-out, swap, fade-in at a fixed duration
//! - **Fallbacks**: a not-found fragment is rendered locally on failure
//!
//! The router never talks to the interceptor directly; its fragment
//! fetches cross the network boundary through a [`FragmentSource`], which
//! is where interception happens in a running system.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod history;

pub use history::{HistoryEntry, NavigationType, SessionHistory};

// ==================== Errors ====================

/// Typed failure of a fragment fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FragmentError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Fragment not found")]
    NotFound,

    #[error("Fragment decode failure: {0}")]
    Decode(String),
}

impl From<FragmentError> for pagekit_common::PageKitError {
    fn from(error: FragmentError) -> Self {
        pagekit_common::PageKitError::router(error.to_string())
    }
}

// ==================== Seams ====================

/// The network side of the router: resolves a fragment resource path to
/// its HTML. In a running system this call is what the fetch interceptor
/// observes.
pub trait FragmentSource: Send + Sync {
    /// Fetch a fragment resource.
    fn fetch_fragment<'a>(
        &'a self,
        resource: &'a str,
    ) -> BoxFuture<'a, Result<String, FragmentError>>;
}

/// The document side of the router: receives the swapped-in markup.
pub trait ContentSink: Send + Sync {
    /// Replace the main content area.
    fn replace(&self, html: &str);
}

// ==================== Route table ====================

/// Mapping from logical path to fragment resource path.
///
/// The default entry always resolves; unknown paths fall back to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTable {
    default_path: String,
    default_resource: String,
    routes: HashMap<String, String>,
}

impl RouteTable {
    /// Create a table with its default route.
    pub fn new(default_path: impl Into<String>, default_resource: impl Into<String>) -> Self {
        let default_path = default_path.into();
        let default_resource = default_resource.into();
        let mut routes = HashMap::new();
        routes.insert(default_path.clone(), default_resource.clone());
        Self {
            default_path,
            default_resource,
            routes,
        }
    }

    /// Add a route.
    pub fn insert(&mut self, path: impl Into<String>, resource: impl Into<String>) {
        self.routes.insert(path.into(), resource.into());
    }

    /// Builder-style route registration.
    pub fn route(mut self, path: impl Into<String>, resource: impl Into<String>) -> Self {
        self.insert(path, resource);
        self
    }

    /// The default path.
    pub fn default_path(&self) -> &str {
        &self.default_path
    }

    /// Whether a path has its own entry.
    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// Resolve a path to its fragment resource, falling back to the
    /// default entry.
    pub fn resolve(&self, path: &str) -> &str {
        self.routes
            .get(path)
            .map(String::as_str)
            .unwrap_or(&self.default_resource)
    }
}

// ==================== Config & state ====================

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Duration of each transition phase (fade-out and fade-in).
    pub transition: Duration,

    /// Replace the history entry with the default path when a
    /// back/forward fetch ends in the not-found fallback.
    pub rewrite_history_on_fallback: bool,

    /// Markup rendered when a fragment cannot be fetched.
    pub not_found_html: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            transition: Duration::from_millis(200),
            rewrite_history_on_fallback: false,
            not_found_html: concat!(
                "<div class=\"section\"><div class=\"container\">",
                "<h1>Page Not Found</h1>",
                "<p>Sorry, we couldn't find the page you're looking for.</p>",
                "<a href=\"/\" class=\"btn btn-primary\" data-link>Go Home</a>",
                "</div></div>"
            )
            .to_string(),
        }
    }
}

/// Navigation state owned by the router.
#[derive(Debug, Clone, Default)]
pub struct NavigationState {
    /// The current route path.
    pub current_path: String,

    /// Whether a route transition is in flight.
    pub is_navigating: bool,

    /// Whether the page believes it is offline.
    pub offline: bool,
}

/// Events emitted towards the page shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// Fade-out began for a route change.
    TransitionStarted { path: String },
    /// New content was swapped in.
    ContentSwapped { path: String },
    /// Fade-in finished.
    TransitionFinished { path: String },
    /// The highlighted navigation item should change.
    ActiveNavChanged { path: String },
    /// The viewport should return to the top.
    ScrollToTop,
    /// The offline indicator should change.
    OfflineChanged { offline: bool },
    /// A route rendered the not-found fallback.
    RouteNotFound { path: String },
}

/// Result of a routing call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The fragment was fetched and swapped in.
    Rendered,
    /// The not-found fallback was rendered.
    NotFound,
    /// The call was ignored (navigation already in flight, or same path).
    Ignored,
}

// ==================== Router ====================

/// The client-side router for one page shell.
pub struct Router {
    /// Router configuration.
    pub config: RouterConfig,

    /// Route table.
    pub routes: RouteTable,

    /// Navigation state.
    pub state: NavigationState,

    history: SessionHistory,
    fragments: Arc<dyn FragmentSource>,
    sink: Arc<dyn ContentSink>,
    event_tx: mpsc::UnboundedSender<RouterEvent>,
}

impl Router {
    /// Create a router. Events stream to the returned receiver.
    pub fn new(
        config: RouterConfig,
        routes: RouteTable,
        fragments: Arc<dyn FragmentSource>,
        sink: Arc<dyn ContentSink>,
    ) -> (Self, mpsc::UnboundedReceiver<RouterEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                routes,
                state: NavigationState::default(),
                history: SessionHistory::new(),
                fragments,
                sink,
                event_tx,
            },
            event_rx,
        )
    }

    /// Handle the initial page load: seed the history from the current
    /// location and render that route.
    pub async fn init(&mut self, location_path: &str) -> RouteOutcome {
        let path = self.normalize(location_path);
        info!(%path, "Router init");
        self.history.push(path.clone());
        self.handle_route(&path).await
    }

    /// The session history.
    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    /// Flip the offline flag from connectivity edge events.
    pub fn set_offline(&mut self, offline: bool) {
        if self.state.offline != offline {
            self.state.offline = offline;
            debug!(offline, "Connectivity changed");
            let _ = self.event_tx.send(RouterEvent::OfflineChanged { offline });
        }
    }

    /// Whether a link intent belongs to this router. External absolute
    /// URLs are left to the browser.
    pub fn is_internal_link(href: &str) -> bool {
        !href.is_empty() && !href.starts_with("http") && href.starts_with('/')
    }

    /// Handle a click on a navigational element.
    pub async fn handle_link_click(&mut self, href: &str) -> RouteOutcome {
        if !Self::is_internal_link(href) {
            return RouteOutcome::Ignored;
        }
        self.navigate_to(href).await
    }

    /// Navigate to a new route. Ignored while a navigation is in flight
    /// or when already at the path; pushes a history entry on success.
    pub async fn navigate_to(&mut self, path: &str) -> RouteOutcome {
        let path = self.normalize(path);
        if self.state.is_navigating || path == self.state.current_path {
            debug!(%path, "Navigation ignored");
            return RouteOutcome::Ignored;
        }

        let outcome = self.handle_route(&path).await;
        if outcome == RouteOutcome::Rendered {
            self.history.push(path);
        }
        outcome
    }

    /// Resolve and render a route. Does not touch the history; that is
    /// the caller's decision.
    pub async fn handle_route(&mut self, path: &str) -> RouteOutcome {
        let path = self.normalize(path);
        self.state.is_navigating = true;
        self.state.current_path = path.clone();
        let _ = self
            .event_tx
            .send(RouterEvent::ActiveNavChanged { path: path.clone() });

        let resource = self.routes.resolve(&path).to_string();
        debug!(%path, %resource, "Handling route");

        let outcome = match self.fragments.fetch_fragment(&resource).await {
            Ok(html) => {
                self.transition(&path, &html).await;
                RouteOutcome::Rendered
            }
            Err(error) => {
                warn!(%path, %error, "Fragment fetch failed, rendering fallback");
                self.sink.replace(&self.config.not_found_html);
                let _ = self
                    .event_tx
                    .send(RouterEvent::RouteNotFound { path: path.clone() });
                RouteOutcome::NotFound
            }
        };

        self.state.is_navigating = false;
        outcome
    }

    /// Go back one entry and render it, without creating a new entry.
    pub async fn back(&mut self) -> Option<RouteOutcome> {
        let path = self.history.back()?.path.clone();
        Some(self.route_from_history(&path).await)
    }

    /// Go forward one entry and render it, without creating a new entry.
    pub async fn forward(&mut self) -> Option<RouteOutcome> {
        let path = self.history.forward()?.path.clone();
        Some(self.route_from_history(&path).await)
    }

    /// Handle an externally observed pop: the route is rebuilt from the
    /// entry state when present, else from the location.
    pub async fn handle_pop_state(
        &mut self,
        state_path: Option<&str>,
        location_path: &str,
    ) -> RouteOutcome {
        let path = state_path.unwrap_or(location_path).to_string();
        self.route_from_history(&path).await
    }

    async fn route_from_history(&mut self, path: &str) -> RouteOutcome {
        let outcome = self.handle_route(path).await;
        if outcome == RouteOutcome::NotFound && self.config.rewrite_history_on_fallback {
            let default_path = self.routes.default_path().to_string();
            self.history.replace(default_path.clone());
            self.state.current_path = default_path;
        }
        outcome
    }

    async fn transition(&self, path: &str, html: &str) {
        let _ = self.event_tx.send(RouterEvent::TransitionStarted {
            path: path.to_string(),
        });
        tokio::time::sleep(self.config.transition).await;

        self.sink.replace(html);
        let _ = self.event_tx.send(RouterEvent::ContentSwapped {
            path: path.to_string(),
        });
        let _ = self.event_tx.send(RouterEvent::ScrollToTop);

        tokio::time::sleep(self.config.transition).await;
        let _ = self.event_tx.send(RouterEvent::TransitionFinished {
            path: path.to_string(),
        });
    }

    fn normalize(&self, path: &str) -> String {
        if path.is_empty() {
            self.routes.default_path().to_string()
        } else {
            path.to_string()
        }
    }
}
