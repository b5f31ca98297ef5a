/// Smoke-test for the rendered path.
///
/// Launches a headless Chromium through `BrowserManager` (local first, then
/// docker), renders <https://example.com>, converts it and scores it.
///
/// Run with:
///   cargo run -p fetchi-client --example browser_smoke --features browser
use std::sync::Arc;
use std::time::Duration;

use fetchi_client::{ChromiumLauncher, HtmdConverter, RenderedFetcher};
use fetchi_core::browser::BrowserManager;
use fetchi_core::config::{BrowserMode, WaitStrategy};
use fetchi_core::quality::{QualityValidator, format_report};
use fetchi_core::traits::{Converter, Fetcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let manager = Arc::new(BrowserManager::new(
        ChromiumLauncher::default(),
        BrowserMode::Auto,
        Duration::from_secs(60),
    ));
    let fetcher = RenderedFetcher::new(
        Arc::clone(&manager),
        WaitStrategy::Networkidle,
        Duration::from_secs(30),
    );

    let url = "https://example.com";
    println!("Rendering {url} …");
    let result = fetcher.fetch(url).await;
    println!("Browser mode: {:?}", manager.resolved_mode().await);
    manager.release().await;
    let page = result?;

    assert!(
        page.html.contains("Example Domain"),
        "Expected heading not found in rendered HTML"
    );

    let doc = HtmdConverter::new().convert(&page, url);
    let report = QualityValidator::default().validate(&doc.markdown_clean);

    println!("OK: got {} bytes of rendered HTML", page.html.len());
    println!("Title: {}", doc.title);
    println!("{}", format_report(&report));
    Ok(())
}
