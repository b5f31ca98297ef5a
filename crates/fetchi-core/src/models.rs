use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::AppError;

/// Which fetcher produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    Static,
    Rendered,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Static => "static",
            SourceMode::Rendered => "rendered",
        }
    }
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attempt budget and score thresholds for one request.
///
/// Invariant: `min_score <= js_retry_threshold <= 100`, `max_attempts >= 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Floor below which content is unusable regardless of mode.
    pub min_score: u8,
    /// Static results scoring strictly below this are re-fetched rendered.
    pub js_retry_threshold: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Duration::from_millis(1000),
            min_score: 60,
            js_retry_threshold: 85,
        }
    }
}

/// Effective per-request options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub policy: RetryPolicy,
    /// Whether escalation to the rendered path is permitted at all.
    pub allow_rendering: bool,
    /// Skip the static attempt and go straight to rendering.
    pub force_rendered: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::default(),
            allow_rendering: true,
            force_rendered: false,
        }
    }
}

/// A single page to fetch. Immutable once created.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    id: Uuid,
    url: String,
    query: Option<String>,
    options: FetchOptions,
}

impl FetchRequest {
    /// Build a request, rejecting anything that is not an absolute http(s) URL.
    pub fn new(
        url: impl Into<String>,
        query: Option<String>,
        options: FetchOptions,
    ) -> Result<Self, AppError> {
        let url = url.into();
        let parsed = Url::parse(&url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(AppError::InvalidUrl(format!(
                    "URL scheme '{scheme}' is not allowed (only http/https)"
                )));
            }
        }
        if parsed.host_str().is_none() {
            return Err(AppError::InvalidUrl(format!("{url}: URL has no host")));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            url,
            query: query.filter(|q| !q.trim().is_empty()),
            options,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn options(&self) -> &FetchOptions {
        &self.options
    }
}

/// Raw HTML as returned by a fetcher, consumed once by the converter.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub html: String,
    /// URL after redirects.
    pub final_url: String,
    pub source_mode: SourceMode,
}

/// Title plus Markdown derived from a [`RawPage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    pub title: String,
    pub markdown_raw: String,
    pub markdown_clean: String,
    /// Readable-content extraction found nothing and the whole body was used.
    pub extraction_degraded: bool,
}

/// Result of scoring a Markdown document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    /// 0..=100, higher is better.
    pub score: u8,
    pub is_valid: bool,
    /// Blocking problems.
    pub issues: Vec<String>,
    /// Non-blocking observations.
    pub warnings: Vec<String>,
}

/// The terminal record handed back to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOutcome {
    pub request_id: Uuid,
    pub url: String,
    pub final_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub title: String,
    pub markdown_clean: String,
    /// SHA-256 of `markdown_clean`, for downstream deduplication.
    pub content_hash: String,
    pub quality_report: QualityReport,
    pub attempts_used: u32,
    pub final_mode: SourceMode,
    /// Non-fatal degradations hit while producing this outcome.
    pub warnings: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
