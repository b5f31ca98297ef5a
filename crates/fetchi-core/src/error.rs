use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Application-wide error types for Fetchi.
#[derive(Error, Debug)]
pub enum AppError {
    /// Transport-level failure (connect, DNS, reading the body).
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Static request exceeded its timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatusError { status: u16, url: String },

    /// The rendered page did not reach its readiness condition in time.
    #[error("Navigation to {url} timed out after {timeout_ms} ms")]
    NavigationTimeoutError { url: String, timeout_ms: u64 },

    /// The browser manager could not hand out an instance.
    #[error("Browser unavailable: {0}")]
    BrowserUnavailableError(String),

    /// Neither a local nor a docker browser could be started.
    #[error("Browser launch failed: {0}")]
    BrowserLaunchError(String),

    /// Configuration failed to parse or validate.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// The request URL is not an absolute http(s) URI.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Coarse classification of an [`AppError`], used for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    HttpStatus,
    NavigationTimeout,
    BrowserUnavailable,
    BrowserLaunch,
    Config,
    InvalidUrl,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::NavigationTimeout => "navigation_timeout",
            ErrorKind::BrowserUnavailable => "browser_unavailable",
            ErrorKind::BrowserLaunch => "browser_launch",
            ErrorKind::Config => "config",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::NetworkError(_) => ErrorKind::Network,
            AppError::Timeout(_) => ErrorKind::Timeout,
            AppError::HttpStatusError { .. } => ErrorKind::HttpStatus,
            AppError::NavigationTimeoutError { .. } => ErrorKind::NavigationTimeout,
            AppError::BrowserUnavailableError(_) => ErrorKind::BrowserUnavailable,
            AppError::BrowserLaunchError(_) => ErrorKind::BrowserLaunch,
            AppError::ConfigError(_) => ErrorKind::Config,
            AppError::InvalidUrl(_) => ErrorKind::InvalidUrl,
            AppError::SerializationError(_) => ErrorKind::Serialization,
        }
    }

    /// Returns true if the same fetch mode is worth retrying after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::NetworkError(_) | AppError::Timeout(_))
    }
}

/// Terminal failure of a whole fetch request.
///
/// Only produced when no attempt yielded a usable document.
#[derive(Error, Debug)]
#[error("fetch failed after {attempts} attempt(s): {kind}: {source}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub attempts: u32,
    #[source]
    pub source: AppError,
}

impl FetchError {
    pub fn new(source: AppError, attempts: u32) -> Self {
        Self {
            kind: source.kind(),
            attempts,
            source,
        }
    }
}
