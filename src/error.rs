// src/error.rs

//! Unified error handling for the updater.
//!
//! `AppError` covers configuration, I/O and parsing failures. The update
//! protocol has two narrower error types of its own: [`FetchError`], which
//! the retry loop inspects to tell transient failures from permanent ones,
//! and [`StoreError`], which separates "could not open" from "could not
//! write".

use std::fmt;

use thiserror::Error;

/// Result type alias for updater operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A fetch channel failed
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The item store failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Failure of a single fetch attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The request timed out; eligible for an immediate retry.
    #[error("fetch timed out: {0}")]
    Timeout(String),

    /// The endpoint URL could not be used.
    #[error("malformed endpoint '{endpoint}': {message}")]
    MalformedEndpoint { endpoint: String, message: String },

    /// The server answered, but not with something we understand.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Any other transport failure (refused connection, TLS, DNS...).
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Only timeouts are retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    pub fn malformed_endpoint(endpoint: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::MalformedEndpoint {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_builder() {
            Self::MalformedEndpoint {
                endpoint: e.url().map(|u| u.to_string()).unwrap_or_default(),
                message: e.to_string(),
            }
        } else if e.is_decode() || e.is_status() {
            Self::Protocol(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Item store failure.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be opened or read.
    #[error("failed to open item store: {0}")]
    Open(String),

    /// Writing to the store failed.
    #[error("failed to write item store: {0}")]
    Write(String),
}

impl StoreError {
    pub fn open(message: impl fmt::Display) -> Self {
        Self::Open(message.to_string())
    }

    pub fn write(message: impl fmt::Display) -> Self {
        Self::Write(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeouts_are_transient() {
        assert!(FetchError::Timeout("read".into()).is_transient());
        assert!(!FetchError::Protocol("bad body".into()).is_transient());
        assert!(!FetchError::Transport("refused".into()).is_transient());
        assert!(!FetchError::malformed_endpoint("::", "no scheme").is_transient());
    }

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::open("locked").to_string(),
            "failed to open item store: locked"
        );
        assert_eq!(
            StoreError::write("disk full").to_string(),
            "failed to write item store: disk full"
        );
    }
}
