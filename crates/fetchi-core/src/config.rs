//! Process configuration for Fetchi.
//!
//! Config is a JSON object with four optional sections (`quality`, `paths`,
//! `playwright`, `retry`). Every field has a default, so `{}` is a complete
//! configuration. Values are range-checked after parsing.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::{FetchOptions, RetryPolicy};

/// Default container image used when the browser runs under docker.
///
/// Must expose the Chrome DevTools Protocol on port 9222.
pub const DEFAULT_DOCKER_IMAGE: &str = "chromedp/headless-shell:131.0.6778.85";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchiConfig {
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub playwright: PlaywrightConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityConfig {
    #[serde(default = "default_min_score")]
    pub min_score: u32,
    #[serde(default = "default_js_retry_threshold")]
    pub js_retry_threshold: u32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            js_retry_threshold: default_js_retry_threshold(),
        }
    }
}

fn default_min_score() -> u32 {
    60
}
fn default_js_retry_threshold() -> u32 {
    85
}

/// Locations used by the persistence layer; the pipeline never touches them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathsConfig {
    #[serde(default = "default_temp_dir")]
    pub temp_dir: String,
    #[serde(default = "default_docs_dir")]
    pub docs_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            docs_dir: default_docs_dir(),
        }
    }
}

fn default_temp_dir() -> String {
    ".tmp".into()
}
fn default_docs_dir() -> String {
    "docs/ai/references".into()
}

/// Browser execution strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    Local,
    Docker,
    #[default]
    Auto,
}

impl fmt::Display for BrowserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowserMode::Local => write!(f, "local"),
            BrowserMode::Docker => write!(f, "docker"),
            BrowserMode::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for BrowserMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(BrowserMode::Local),
            "docker" => Ok(BrowserMode::Docker),
            "auto" => Ok(BrowserMode::Auto),
            _ => Err(AppError::ConfigError(format!(
                "Unknown browser mode '{s}' (expected local, docker, or auto)"
            ))),
        }
    }
}

/// Readiness condition a rendered page must reach before its HTML is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitStrategy {
    #[default]
    Networkidle,
    Domcontentloaded,
    Load,
}

impl fmt::Display for WaitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitStrategy::Networkidle => write!(f, "networkidle"),
            WaitStrategy::Domcontentloaded => write!(f, "domcontentloaded"),
            WaitStrategy::Load => write!(f, "load"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaywrightConfig {
    /// Permits escalation to the rendered path.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: BrowserMode,
    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    /// Per-navigation timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub wait_strategy: WaitStrategy,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BrowserMode::default(),
            docker_image: default_docker_image(),
            timeout: default_timeout(),
            wait_strategy: WaitStrategy::default(),
        }
    }
}

impl PlaywrightConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

fn default_true() -> bool {
    true
}
fn default_docker_image() -> String {
    DEFAULT_DOCKER_IMAGE.into()
}
fn default_timeout() -> u64 {
    30_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total fetch attempts across both modes.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    1000
}

impl FetchiConfig {
    /// Parse and validate a JSON config document.
    pub fn from_json_str(raw: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| AppError::ConfigError(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    /// Check ranges and cross-field invariants.
    pub fn validate(&self) -> Result<(), AppError> {
        let q = &self.quality;
        if q.min_score > 100 {
            return Err(AppError::ConfigError(format!(
                "quality.minScore must be between 0 and 100, got {}",
                q.min_score
            )));
        }
        if q.js_retry_threshold > 100 {
            return Err(AppError::ConfigError(format!(
                "quality.jsRetryThreshold must be between 0 and 100, got {}",
                q.js_retry_threshold
            )));
        }
        if q.min_score > q.js_retry_threshold {
            return Err(AppError::ConfigError(format!(
                "quality.minScore ({}) must not exceed quality.jsRetryThreshold ({})",
                q.min_score, q.js_retry_threshold
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::ConfigError(
                "retry.maxAttempts must be at least 1".into(),
            ));
        }
        if self.playwright.timeout == 0 {
            return Err(AppError::ConfigError(
                "playwright.timeout must be greater than 0".into(),
            ));
        }
        if self.playwright.docker_image.trim().is_empty() {
            return Err(AppError::ConfigError(
                "playwright.dockerImage must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Per-request options derived from this config.
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            policy: RetryPolicy::from(self),
            allow_rendering: self.playwright.enabled,
            force_rendered: false,
        }
    }
}

impl From<&FetchiConfig> for RetryPolicy {
    fn from(config: &FetchiConfig) -> Self {
        // Scores are range-checked by `validate`; clamp for unvalidated configs.
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            backoff: Duration::from_millis(config.retry.backoff_ms),
            min_score: config.quality.min_score.min(100) as u8,
            js_retry_threshold: config.quality.js_retry_threshold.min(100) as u8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_yields_defaults() {
        let config = FetchiConfig::from_json_str("{}").unwrap();
        assert_eq!(config.quality.min_score, 60);
        assert_eq!(config.quality.js_retry_threshold, 85);
        assert_eq!(config.paths.temp_dir, ".tmp");
        assert_eq!(config.paths.docs_dir, "docs/ai/references");
        assert_eq!(config.playwright.mode, BrowserMode::Auto);
        assert_eq!(config.playwright.timeout, 30_000);
        assert_eq!(config.playwright.wait_strategy, WaitStrategy::Networkidle);
        assert_eq!(config.playwright.docker_image, DEFAULT_DOCKER_IMAGE);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.backoff_ms, 1000);
        assert_eq!(config, FetchiConfig::default());
    }

    #[test]
    fn test_default_config_validates() {
        assert!(FetchiConfig::default().validate().is_ok());
    }

    #[test]
    fn test_custom_sections() {
        let config = FetchiConfig::from_json_str(
            r#"{
                "quality": { "minScore": 70, "jsRetryThreshold": 90 },
                "paths": { "tempDir": "cache", "docsDir": "docs/refs" },
                "playwright": { "mode": "docker", "waitStrategy": "domcontentloaded" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.quality.min_score, 70);
        assert_eq!(config.quality.js_retry_threshold, 90);
        assert_eq!(config.paths.temp_dir, "cache");
        assert_eq!(config.paths.docs_dir, "docs/refs");
        assert_eq!(config.playwright.mode, BrowserMode::Docker);
        assert_eq!(
            config.playwright.wait_strategy,
            WaitStrategy::Domcontentloaded
        );
        // Untouched fields keep their defaults.
        assert_eq!(config.playwright.timeout, 30_000);
    }

    #[test]
    fn test_all_browser_modes_parse() {
        for (raw, mode) in [
            ("auto", BrowserMode::Auto),
            ("local", BrowserMode::Local),
            ("docker", BrowserMode::Docker),
        ] {
            let json = format!(r#"{{"playwright": {{"mode": "{raw}"}}}}"#);
            assert_eq!(FetchiConfig::from_json_str(&json).unwrap().playwright.mode, mode);
            assert_eq!(raw.parse::<BrowserMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_rejects_invalid_mode() {
        let err = FetchiConfig::from_json_str(r#"{"playwright": {"mode": "invalid"}}"#);
        assert!(matches!(err, Err(AppError::ConfigError(_))));
        assert!("invalid".parse::<BrowserMode>().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_score() {
        let err = FetchiConfig::from_json_str(r#"{"quality": {"minScore": 150}}"#).unwrap_err();
        assert!(err.to_string().contains("minScore"));

        let err = FetchiConfig::from_json_str(r#"{"quality": {"minScore": -1}}"#);
        assert!(matches!(err, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_min_score_above_threshold() {
        let err =
            FetchiConfig::from_json_str(r#"{"quality": {"minScore": 90, "jsRetryThreshold": 80}}"#);
        assert!(matches!(err, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = FetchiConfig::from_json_str(r#"{"retry": {"maxAttempts": 0}}"#);
        assert!(matches!(err, Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let config = FetchiConfig::from_json_str(
            r#"{"retry": {"maxAttempts": 3, "backoffMs": 250}, "playwright": {"enabled": false}}"#,
        )
        .unwrap();
        let opts = config.fetch_options();
        assert_eq!(opts.policy.max_attempts, 3);
        assert_eq!(opts.policy.backoff, Duration::from_millis(250));
        assert_eq!(opts.policy.min_score, 60);
        assert_eq!(opts.policy.js_retry_threshold, 85);
        assert!(!opts.allow_rendering);
        assert!(!opts.force_rendered);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = FetchiConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, FetchiConfig::default());
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".fetchi.json");
        std::fs::write(&path, r#"{"retry": {"maxAttempts": 1}}"#).unwrap();
        let config = FetchiConfig::load(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 1);
    }

    #[test]
    fn test_load_reports_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".fetchi.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FetchiConfig::load(&path),
            Err(AppError::ConfigError(_))
        ));
    }
}
