//! # PageKit Proxy
//!
//! Stateless CORS reverse proxy for PageKit API traffic.
//!
//! Requests under the proxy prefix are stripped of it and forwarded to a
//! fixed upstream origin with `Origin`/`Host`/`Referer` rewritten to that
//! origin. Upstream responses come back with permissive CORS headers
//! injected; OPTIONS preflights short-circuit to 204 without touching the
//! upstream. Nothing is cached and nothing is retried.

use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpResponseBuilder, HttpServer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

/// Errors that can occur while proxying.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("Invalid upstream URL: {0}")]
    InvalidUpstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Bind address.
    pub listen_host: String,

    /// Bind port.
    pub listen_port: u16,

    /// Path prefix stripped before forwarding.
    pub prefix: String,

    /// Fixed upstream origin all traffic forwards to.
    pub upstream: String,

    /// Value of `Access-Control-Allow-Origin`.
    pub allow_origin: String,

    /// Value of `Access-Control-Allow-Methods`.
    pub allow_methods: String,

    /// Value of `Access-Control-Allow-Headers`.
    pub allow_headers: String,

    /// Whether to send `Access-Control-Allow-Credentials: true`.
    pub allow_credentials: bool,

    /// Preflight `Access-Control-Max-Age` in seconds.
    pub max_age: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 8788,
            prefix: "/api".to_string(),
            upstream: "https://secure.upstream.example".to_string(),
            allow_origin: "*".to_string(),
            allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "Authorization, Content-Type, X-Requested-With".to_string(),
            allow_credentials: false,
            max_age: 86400,
        }
    }
}

impl ProxyConfig {
    /// Default config file location.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pagekit")
            .join("proxy.json")
    }

    /// Load the config file, falling back to defaults when it is missing
    /// or unreadable.
    pub fn load_or_default() -> Self {
        let path = Self::config_path();
        match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Bad proxy config, using defaults");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Parse the upstream origin.
    pub fn upstream_url(&self) -> Result<Url, ProxyError> {
        Url::parse(&self.upstream).map_err(|e| ProxyError::InvalidUpstream(e.to_string()))
    }
}

/// Shared per-worker state.
struct ProxyState {
    config: ProxyConfig,
    upstream: Url,
    client: reqwest::Client,
}

impl ProxyState {
    fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        let upstream = config.upstream_url()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ProxyError::Upstream(e.to_string()))?;
        Ok(Self {
            config,
            upstream,
            client,
        })
    }
}

/// Request headers never copied to the upstream: the first three are
/// rewritten, the rest are connection-scoped.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "host",
    "origin",
    "referer",
    "connection",
    "content-length",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
];

/// Response headers never copied back to the caller.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

fn apply_cors(builder: &mut HttpResponseBuilder, config: &ProxyConfig) {
    builder.insert_header(("Access-Control-Allow-Origin", config.allow_origin.as_str()));
    builder.insert_header(("Access-Control-Allow-Methods", config.allow_methods.as_str()));
    builder.insert_header(("Access-Control-Allow-Headers", config.allow_headers.as_str()));
    if config.allow_credentials {
        builder.insert_header(("Access-Control-Allow-Credentials", "true"));
    }
}

/// 204 preflight answer; the upstream is never consulted.
fn preflight_response(config: &ProxyConfig) -> HttpResponse {
    let mut builder = HttpResponse::NoContent();
    apply_cors(&mut builder, config);
    builder.insert_header(("Access-Control-Max-Age", config.max_age.to_string()));
    builder.finish()
}

/// 500 diagnostic with the permissive origin header.
fn error_response(config: &ProxyConfig, error: &ProxyError) -> HttpResponse {
    let mut builder = HttpResponse::InternalServerError();
    builder.insert_header(("Access-Control-Allow-Origin", config.allow_origin.as_str()));
    builder.json(serde_json::json!({ "error": error.to_string() }))
}

async fn forward(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<ProxyState>,
) -> HttpResponse {
    if req.method() == actix_web::http::Method::OPTIONS {
        debug!(path = %req.path(), "Preflight short-circuit");
        return preflight_response(&state.config);
    }

    match proxy_request(&req, body, &state).await {
        Ok(response) => response,
        Err(e) => {
            error!(path = %req.path(), error = %e, "Proxy forwarding failed");
            error_response(&state.config, &e)
        }
    }
}

async fn proxy_request(
    req: &HttpRequest,
    body: web::Bytes,
    state: &ProxyState,
) -> Result<HttpResponse, ProxyError> {
    let config = &state.config;

    let path = req.path();
    let stripped = path.strip_prefix(config.prefix.as_str()).unwrap_or(path);

    let mut target = state.upstream.clone();
    target.set_path(stripped);
    if !req.query_string().is_empty() {
        target.set_query(Some(req.query_string()));
    }

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    debug!(%method, path = %stripped, upstream = %target, "Forwarding to upstream");

    // Copy caller headers, dropping the ones we rewrite below.
    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in req.headers() {
        let lower = name.as_str().to_ascii_lowercase();
        if STRIPPED_REQUEST_HEADERS.contains(&lower.as_str()) {
            continue;
        }
        if let (Ok(n), Ok(v)) = (
            reqwest::header::HeaderName::try_from(name.as_str()),
            reqwest::header::HeaderValue::from_bytes(value.as_bytes()),
        ) {
            headers.insert(n, v);
        }
    }

    // The upstream only accepts traffic that looks like its own origin.
    let upstream_origin = state.upstream.origin().ascii_serialization();
    if let Ok(v) = reqwest::header::HeaderValue::try_from(upstream_origin.as_str()) {
        headers.insert(reqwest::header::ORIGIN, v);
    }
    if let Ok(v) = reqwest::header::HeaderValue::try_from(format!("{upstream_origin}/")) {
        headers.insert(reqwest::header::REFERER, v);
    }

    let mut builder = state.client.request(method.clone(), target).headers(headers);
    if method != reqwest::Method::GET && method != reqwest::Method::HEAD {
        builder = builder.body(body.to_vec());
    }

    let upstream_response = builder
        .send()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let status = upstream_response.status().as_u16();
    let upstream_headers = upstream_response.headers().clone();
    let bytes = upstream_response
        .bytes()
        .await
        .map_err(|e| ProxyError::Upstream(e.to_string()))?;

    let mut response = HttpResponse::build(
        StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
    );
    for (name, value) in upstream_headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if STRIPPED_RESPONSE_HEADERS.contains(&lower.as_str())
            || lower.starts_with("access-control-")
        {
            continue;
        }
        response.insert_header((name.as_str(), value.as_bytes()));
    }
    apply_cors(&mut response, config);

    Ok(response.body(bytes.to_vec()))
}

/// Run the proxy server until shutdown.
pub async fn run(config: ProxyConfig) -> std::io::Result<()> {
    let bind = (config.listen_host.clone(), config.listen_port);
    info!(host = %bind.0, port = bind.1, upstream = %config.upstream, "Starting proxy");

    let state = ProxyState::new(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    let state = web::Data::new(state);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(state.clone())
            .default_service(web::to(forward))
    })
    .bind(bind)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(upstream: &str) -> ProxyConfig {
        ProxyConfig {
            upstream: upstream.to_string(),
            ..Default::default()
        }
    }

    macro_rules! test_app {
        ($config:expr) => {{
            let state = web::Data::new(ProxyState::new($config).unwrap());
            test::init_service(
                App::new()
                    .app_data(state)
                    .default_service(web::to(forward)),
            )
            .await
        }};
    }

    #[::core::prelude::v1::test]
    fn test_config_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.prefix, "/api");
        assert_eq!(config.allow_origin, "*");
        assert_eq!(config.max_age, 86400);
        assert!(!config.allow_credentials);
    }

    #[actix_web::test]
    async fn test_preflight_short_circuits() {
        let app = test_app!(test_config("https://upstream.example"));

        let req = test::TestRequest::with_uri("/api/v1/slots")
            .method(actix_web::http::Method::OPTIONS)
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let headers = resp.headers();
        assert_eq!(
            headers.get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        assert!(headers.get("Access-Control-Allow-Methods").is_some());
        assert_eq!(headers.get("Access-Control-Max-Age").unwrap(), "86400");
    }

    #[actix_web::test]
    async fn test_forward_strips_prefix_and_rewrites_headers() {
        let server = MockServer::start().await;
        let origin = server.uri();

        Mock::given(method("GET"))
            .and(path("/v1/slots"))
            .and(header("Origin", origin.as_str()))
            .and(header("Referer", format!("{origin}/").as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/json")
                    .set_body_string("[1,2]"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let app = test_app!(test_config(&origin));
        let req = test::TestRequest::with_uri("/api/v1/slots")
            .insert_header(("Origin", "https://pages.example"))
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        let body = test::read_body(resp).await;
        assert_eq!(&body[..], b"[1,2]");
    }

    #[actix_web::test]
    async fn test_forward_preserves_status_and_query() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/slots"))
            .and(wiremock::matchers::query_param("day", "mon"))
            .respond_with(ResponseTemplate::new(404).set_body_string("none"))
            .mount(&server)
            .await;

        let app = test_app!(test_config(&server.uri()));
        let req = test::TestRequest::with_uri("/api/v1/slots?day=mon").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_post_body_is_forwarded() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/book"))
            .and(wiremock::matchers::body_string("{\"slot\":3}"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let app = test_app!(test_config(&server.uri()));
        let req = test::TestRequest::post()
            .uri("/api/v1/book")
            .set_payload("{\"slot\":3}")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn test_upstream_failure_returns_json_500() {
        // Nothing listens on this port.
        let app = test_app!(test_config("http://127.0.0.1:9"));

        let req = test::TestRequest::with_uri("/api/v1/slots").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );
        let body: serde_json::Value =
            serde_json::from_slice(&test::read_body(resp).await).unwrap();
        assert!(body.get("error").is_some());
    }

    #[actix_web::test]
    async fn test_upstream_cors_headers_are_replaced() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/slots"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Access-Control-Allow-Origin", "https://unwanted.example"),
            )
            .mount(&server)
            .await;

        let app = test_app!(test_config(&server.uri()));
        let req = test::TestRequest::with_uri("/api/v1/slots").to_request();
        let resp = test::call_service(&app, req).await;

        let values: Vec<_> = resp
            .headers()
            .get_all("Access-Control-Allow-Origin")
            .into_iter()
            .collect();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0], "*");
    }
}
