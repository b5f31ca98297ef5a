use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::{Browser, BrowserConfig, Handler, Page};
use fetchi_core::browser::{BrowserLauncher, BrowserManager};
use fetchi_core::config::{DEFAULT_DOCKER_IMAGE, WaitStrategy};
use fetchi_core::error::AppError;
use fetchi_core::models::{RawPage, SourceMode};
use fetchi_core::traits::Fetcher;
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tokio::task::JoinHandle;
use url::Url;

use crate::fetcher::parse_http_url;

/// Port the DevTools endpoint listens on inside the container.
const CDP_PORT: u16 = 9222;
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long the resource count must stay flat to count as network idle.
const NETWORK_IDLE: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// A connected Chromium plus the CDP event loop that drives it.
pub struct ChromiumInstance {
    browser: Browser,
    handler: JoinHandle<()>,
    container_id: Option<String>,
}

impl ChromiumInstance {
    pub fn browser(&self) -> &Browser {
        &self.browser
    }

    fn new(browser: Browser, handler: Handler, container_id: Option<String>) -> Self {
        Self {
            browser,
            handler: spawn_handler(handler),
            container_id,
        }
    }
}

/// Launches Chromium via the Chrome DevTools Protocol, either as a local
/// headless process or inside a docker container.
///
/// Setting `FETCHI_NO_LOCAL_BROWSER=1` disallows the local path, so `auto`
/// mode goes straight to docker.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    docker_image: String,
    local_allowed: bool,
}

impl ChromiumLauncher {
    pub fn new(docker_image: impl Into<String>) -> Self {
        let local_allowed = !std::env::var("FETCHI_NO_LOCAL_BROWSER")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            docker_image: docker_image.into(),
            local_allowed,
        }
    }

    pub fn docker_image(&self) -> &str {
        &self.docker_image
    }

    /// Tries to locate the real Chrome/Chromium binary.
    ///
    /// On systems where Chromium is installed via **snap**, the wrapper at
    /// `/snap/bin/chromium` strips unknown CLI flags, breaking headless mode.
    /// `CHROME_BIN` wins when it points at an existing file. If nothing is
    /// found we return `None` and let `chromiumoxide` do its own lookup.
    fn find_chrome_binary() -> Option<PathBuf> {
        if let Ok(p) = std::env::var("CHROME_BIN") {
            let path = PathBuf::from(&p);
            if path.exists() {
                return Some(path);
            }
        }

        [
            "/snap/chromium/current/usr/lib/chromium-browser/chrome",
            "/var/lib/flatpak/exports/bin/org.chromium.Chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
        ]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
    }
}

impl Default for ChromiumLauncher {
    fn default() -> Self {
        Self::new(DEFAULT_DOCKER_IMAGE)
    }
}

impl BrowserLauncher for ChromiumLauncher {
    type Instance = ChromiumInstance;

    fn local_allowed(&self) -> bool {
        self.local_allowed
    }

    async fn launch_local(&self) -> Result<ChromiumInstance, AppError> {
        let mut builder = BrowserConfig::builder().no_sandbox().disable_default_args();
        if let Some(bin) = Self::find_chrome_binary() {
            tracing::info!("Using Chrome binary: {}", bin.display());
            builder = builder.chrome_executable(bin);
        }

        let config = builder
            .arg("--headless=new")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking")
            .arg("--disable-translate")
            .arg("--no-first-run")
            .build()
            .map_err(|e| AppError::BrowserLaunchError(format!("Browser config error: {e}")))?;

        let (browser, handler) = Browser::launch(config)
            .await
            .map_err(|e| AppError::BrowserLaunchError(format!("Failed to launch browser: {e}")))?;

        Ok(ChromiumInstance::new(browser, handler, None))
    }

    async fn launch_docker(&self) -> Result<ChromiumInstance, AppError> {
        let publish = format!("127.0.0.1::{CDP_PORT}");
        let stdout = docker(&["run", "-d", "--rm", "-p", &publish, &self.docker_image]).await?;
        let mut guard = ContainerGuard(Some(stdout.trim().to_string()));
        let id = guard.id().to_string();
        tracing::info!(container = %id, image = %self.docker_image, "Started browser container");

        let mapping = docker(&["port", &id, &format!("{CDP_PORT}/tcp")]).await?;
        let port = parse_mapped_port(&mapping).ok_or_else(|| {
            AppError::BrowserLaunchError(format!("Unexpected docker port output: {mapping:?}"))
        })?;

        let ws_url = wait_for_devtools(port).await?;
        let (browser, handler) = Browser::connect(ws_url).await.map_err(|e| {
            AppError::BrowserLaunchError(format!("Failed to connect to browser container: {e}"))
        })?;

        guard.disarm();
        Ok(ChromiumInstance::new(browser, handler, Some(id)))
    }

    /// The CDP handler task ends when the websocket closes, which happens when
    /// Chromium crashes or its container goes away.
    fn is_alive(&self, instance: &ChromiumInstance) -> bool {
        !instance.handler.is_finished()
    }

    async fn shutdown(&self, instance: Arc<ChromiumInstance>) {
        match Arc::try_unwrap(instance) {
            Ok(mut inst) => {
                if let Err(e) = inst.browser.close().await {
                    tracing::warn!(error = %e, "Browser did not close cleanly");
                }
                if inst.container_id.is_none()
                    && let Err(e) = inst.browser.wait().await
                {
                    tracing::warn!(error = %e, "Failed to reap browser process");
                }
                inst.handler.abort();
                if let Some(id) = &inst.container_id {
                    remove_container(id).await;
                }
            }
            Err(shared) => {
                tracing::warn!("Browser still referenced at release, dropping connection");
                shared.handler.abort();
                if let Some(id) = &shared.container_id {
                    remove_container(id).await;
                }
            }
        }
    }
}

/// The CDP handler must be polled continuously for the connection to work.
fn spawn_handler(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                tracing::warn!("Browser CDP handler error: {event:?}");
                break;
            }
        }
    })
}

/// Run a docker subcommand and return its stdout.
async fn docker(args: &[&str]) -> Result<String, AppError> {
    let output = Command::new("docker")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| AppError::BrowserLaunchError(format!("docker is not available: {e}")))?;

    if !output.status.success() {
        return Err(AppError::BrowserLaunchError(format!(
            "docker {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn remove_container(id: &str) {
    match docker(&["rm", "-f", id]).await {
        Ok(_) => tracing::info!(container = %id, "Removed browser container"),
        Err(e) => tracing::warn!(container = %id, error = %e, "Failed to remove browser container"),
    }
}

/// Removes a half-started container if launch is abandoned before connecting.
struct ContainerGuard(Option<String>);

impl ContainerGuard {
    fn id(&self) -> &str {
        self.0.as_deref().unwrap_or_default()
    }

    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if let Some(id) = self.0.take() {
            let spawned = std::process::Command::new("docker")
                .args(["rm", "-f", &id])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();
            if let Err(e) = spawned {
                tracing::warn!(container = %id, error = %e, "Failed to clean up browser container");
            }
        }
    }
}

/// Host port from `docker port` output such as `127.0.0.1:49153`.
fn parse_mapped_port(output: &str) -> Option<u16> {
    output
        .lines()
        .find_map(|line| line.trim().rsplit_once(':'))
        .and_then(|(_, port)| port.parse().ok())
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "webSocketDebuggerUrl")]
    ws_url: String,
}

/// Poll `/json/version` until the container's DevTools endpoint answers,
/// then return its websocket URL pointed at the mapped host port.
async fn wait_for_devtools(port: u16) -> Result<String, AppError> {
    let endpoint = format!("http://127.0.0.1:{port}/json/version");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .map_err(|e| AppError::BrowserLaunchError(e.to_string()))?;

    loop {
        let info = match client.get(&endpoint).send().await {
            Ok(resp) if resp.status().is_success() => resp.json::<VersionInfo>().await.ok(),
            _ => None,
        };
        if let Some(info) = info {
            return rewrite_ws_port(&info.ws_url, port);
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
}

fn rewrite_ws_port(ws_url: &str, port: u16) -> Result<String, AppError> {
    let bad_url = |detail: String| {
        AppError::BrowserLaunchError(format!("Bad DevTools URL {ws_url}: {detail}"))
    };
    let mut url = Url::parse(ws_url).map_err(|e| bad_url(e.to_string()))?;
    url.set_host(Some("127.0.0.1"))
        .map_err(|e| bad_url(e.to_string()))?;
    url.set_port(Some(port))
        .map_err(|_| bad_url("cannot carry a port".to_string()))?;
    Ok(url.to_string())
}

// ---------------------------------------------------------------------------
// Rendered fetcher
// ---------------------------------------------------------------------------

/// Headless-browser fetcher.
///
/// Unlike [`crate::StaticFetcher`], this renders JavaScript before returning
/// the HTML. The browser comes from a shared [`BrowserManager`]; each call
/// opens a tab, waits per [`WaitStrategy`], grabs the DOM and closes the tab.
#[derive(Clone)]
pub struct RenderedFetcher {
    manager: Arc<BrowserManager<ChromiumLauncher>>,
    wait: WaitStrategy,
    timeout: Duration,
}

impl RenderedFetcher {
    pub fn new(
        manager: Arc<BrowserManager<ChromiumLauncher>>,
        wait: WaitStrategy,
        timeout: Duration,
    ) -> Self {
        Self {
            manager,
            wait,
            timeout,
        }
    }

    async fn render(&self, page: &Page, url: &str) -> Result<RawPage, AppError> {
        let nav = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| AppError::NetworkError(format!("Navigation to {url} failed: {e}")))?;
        if let Some(error_text) = &nav.result.error_text {
            return Err(AppError::NetworkError(format!(
                "Navigation to {url} failed: {error_text}"
            )));
        }

        self.wait_until_ready(page).await?;

        let html = page
            .content()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read page content: {e}")))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(RawPage {
            html,
            final_url,
            source_mode: SourceMode::Rendered,
        })
    }

    async fn wait_until_ready(&self, page: &Page) -> Result<(), AppError> {
        let ready: &[&str] = match self.wait {
            WaitStrategy::Domcontentloaded => &["interactive", "complete"],
            WaitStrategy::Load | WaitStrategy::Networkidle => &["complete"],
        };
        loop {
            let state: String = evaluate(page, "document.readyState").await?;
            if ready.contains(&state.as_str()) {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if self.wait == WaitStrategy::Networkidle {
            let count_js = "performance.getEntriesByType('resource').length";
            let mut last: u64 = evaluate(page, count_js).await?;
            let mut stable_since = Instant::now();
            while stable_since.elapsed() < NETWORK_IDLE {
                tokio::time::sleep(POLL_INTERVAL).await;
                let count: u64 = evaluate(page, count_js).await?;
                if count != last {
                    last = count;
                    stable_since = Instant::now();
                }
            }
        }
        Ok(())
    }
}

impl Fetcher for RenderedFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, AppError> {
        parse_http_url(url)?;
        let handle = self.manager.acquire().await.map_err(browser_unavailable)?;
        let page = handle
            .instance()
            .browser()
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::BrowserUnavailableError(format!("Failed to open tab: {e}")))?;

        tracing::debug!(%url, wait = %self.wait, browser = %handle.mode(), "Rendering page");
        let result = tokio::time::timeout(self.timeout, self.render(&page, url)).await;

        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Failed to close tab");
        }

        match result {
            Ok(inner) => inner,
            Err(_) => Err(AppError::NavigationTimeoutError {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

/// The manager failing to supply a browser makes the rendered path unusable.
fn browser_unavailable(err: AppError) -> AppError {
    match err {
        AppError::BrowserUnavailableError(_) => err,
        other => AppError::BrowserUnavailableError(other.to_string()),
    }
}

async fn evaluate<T: DeserializeOwned>(page: &Page, expression: &str) -> Result<T, AppError> {
    page.evaluate(expression)
        .await
        .map_err(|e| AppError::NetworkError(format!("Script evaluation failed: {e}")))?
        .into_value()
        .map_err(|e| AppError::NetworkError(format!("Unexpected script result: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_docker_port_output() {
        assert_eq!(parse_mapped_port("127.0.0.1:49153\n"), Some(49153));
        assert_eq!(parse_mapped_port("0.0.0.0:32768\n[::]:32768\n"), Some(32768));
        assert_eq!(parse_mapped_port(""), None);
        assert_eq!(parse_mapped_port("garbage"), None);
    }

    #[test]
    fn rewrites_devtools_url_to_mapped_port() {
        let url = rewrite_ws_port("ws://0.0.0.0:9222/devtools/browser/abc-123", 49153).unwrap();
        assert_eq!(url, "ws://127.0.0.1:49153/devtools/browser/abc-123");
        assert!(rewrite_ws_port("not a url", 1).is_err());
    }

    #[tokio::test]
    async fn rejects_non_http_urls_before_launching() {
        let manager = Arc::new(BrowserManager::new(
            ChromiumLauncher::default(),
            fetchi_core::config::BrowserMode::Docker,
            Duration::from_secs(1),
        ));
        let fetcher = RenderedFetcher::new(
            Arc::clone(&manager),
            WaitStrategy::Load,
            Duration::from_secs(1),
        );
        let err = fetcher.fetch("file:///etc/hosts").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidUrl(_)));
        assert!(!manager.is_active().await);
    }

    #[test]
    fn launch_failures_surface_as_browser_unavailable() {
        let err = browser_unavailable(AppError::BrowserLaunchError(
            "local: no chrome; docker: daemon down".into(),
        ));
        match err {
            AppError::BrowserUnavailableError(msg) => {
                assert!(msg.contains("local: no chrome; docker: daemon down"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = browser_unavailable(AppError::BrowserUnavailableError("gone".into()));
        assert_eq!(err.to_string(), "Browser unavailable: gone");
    }

    #[test]
    fn default_launcher_uses_pinned_image() {
        assert_eq!(ChromiumLauncher::default().docker_image(), DEFAULT_DOCKER_IMAGE);
    }
}
