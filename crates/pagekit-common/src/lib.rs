//! # PageKit Common
//!
//! Common error types and logging configuration for the PageKit offline
//! web runtime.
//!
//! ## Features
//!
//! - Unified error type spanning the cache, worker, router and proxy crates
//! - Logging configuration and setup
//! - Result extension traits

use thiserror::Error;

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Unified error type for PageKit.
#[derive(Error, Debug)]
pub enum PageKitError {
    /// Cache storage errors.
    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Worker lifecycle and interception errors.
    #[error("Worker error: {message}")]
    Worker {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Router and navigation errors.
    #[error("Router error: {message}")]
    Router {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Proxy forwarding errors.
    #[error("Proxy error: {message}")]
    Proxy {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network errors.
    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration errors.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PageKitError {
    /// Create a cache error.
    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
            source: None,
        }
    }

    /// Create a cache error with source.
    pub fn cache_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Cache {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a worker error.
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker {
            message: message.into(),
            source: None,
        }
    }

    /// Create a router error.
    pub fn router(message: impl Into<String>) -> Self {
        Self::Router {
            message: message.into(),
            source: None,
        }
    }

    /// Create a proxy error.
    pub fn proxy(message: impl Into<String>) -> Self {
        Self::Proxy {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
        }
    }

    /// Create a network error with source.
    pub fn network_with_source<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Check if this error can be absorbed by serving cached content.
    pub fn is_offline_recoverable(&self) -> bool {
        matches!(self, PageKitError::Network { .. } | PageKitError::Io(_))
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            PageKitError::Cache { .. } => "cache",
            PageKitError::Worker { .. } => "worker",
            PageKitError::Router { .. } => "router",
            PageKitError::Proxy { .. } => "proxy",
            PageKitError::Network { .. } => "network",
            PageKitError::Config { .. } => "config",
            PageKitError::Io(_) => "io",
            PageKitError::NotFound(_) => "not_found",
            PageKitError::InvalidArgument(_) => "invalid_argument",
        }
    }
}

/// Result type alias for PageKit operations.
pub type Result<T> = std::result::Result<T, PageKitError>;

/// Extension trait for Result.
pub trait ResultExt<T> {
    /// Wrap the error as a network failure with context.
    fn network_context(self, message: impl Into<String>) -> Result<T>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn network_context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| PageKitError::network_with_source(message, e))
    }
}

/// Extension trait for Option.
pub trait OptionExt<T> {
    /// Convert None to a NotFound error.
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, resource: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| PageKitError::NotFound(resource.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(PageKitError::cache("test").category(), "cache");
        assert_eq!(PageKitError::worker("test").category(), "worker");
        assert_eq!(PageKitError::network("test").category(), "network");
        assert_eq!(PageKitError::config("test").category(), "config");
        assert_eq!(PageKitError::NotFound("x".into()).category(), "not_found");
    }

    #[test]
    fn test_result_ext_wraps_network_errors() {
        let failed: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        let wrapped = failed.network_context("fetch failed");
        assert!(matches!(wrapped, Err(PageKitError::Network { .. })));
    }

    #[test]
    fn test_offline_recoverable() {
        assert!(PageKitError::network("connection reset").is_offline_recoverable());
        assert!(!PageKitError::cache("quota").is_offline_recoverable());
        assert!(!PageKitError::proxy("upstream").is_offline_recoverable());
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = PageKitError::cache_with_source("write failed", io);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_option_ext() {
        let some: Option<i32> = Some(7);
        assert_eq!(some.ok_or_not_found("test").unwrap(), 7);

        let none: Option<i32> = None;
        assert!(matches!(
            none.ok_or_not_found("test"),
            Err(PageKitError::NotFound(_))
        ));
    }
}
