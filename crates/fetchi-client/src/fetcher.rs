use std::time::Duration;

use fetchi_core::error::AppError;
use fetchi_core::models::{RawPage, SourceMode};
use fetchi_core::traits::Fetcher;
use reqwest::Client;
use reqwest::redirect::Policy;
use url::Url;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; Fetchi/0.1; +https://github.com/fetchi)";
const MAX_REDIRECTS: usize = 10;

/// Static HTTP fetcher using reqwest.
///
/// Follows redirects, fails on any non-2xx status and never executes
/// scripts. One call is one attempt; retries belong to the service.
#[derive(Clone)]
pub struct StaticFetcher {
    client: Client,
    timeout_ms: u64,
}

impl StaticFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, AppError> {
        let parsed = parse_http_url(url)?;

        let response = self.client.get(parsed).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_ms)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::NetworkError(e.to_string())
            }
        })?;

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(AppError::HttpStatusError {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let html = response.text().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout_ms)
            } else {
                AppError::NetworkError(format!("Failed to read response body: {e}"))
            }
        })?;

        Ok(RawPage {
            html,
            final_url,
            source_mode: SourceMode::Static,
        })
    }
}

/// Only absolute `http`/`https` URLs with a host are fetchable.
pub(crate) fn parse_http_url(url: &str) -> Result<Url, AppError> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{url}: {e}")))?;
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
    Ok(parsed)
}
