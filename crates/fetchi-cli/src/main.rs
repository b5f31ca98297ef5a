use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fetchi_client::{HtmdConverter, StaticFetcher};
use fetchi_core::config::{BrowserMode, FetchiConfig};
use fetchi_core::models::{FetchOutcome, FetchRequest, QualityReport, RetryPolicy};
use fetchi_core::quality::{QualityValidator, format_report};

const DEFAULT_CONFIG_FILE: &str = ".fetchi.json";

#[derive(Parser)]
#[command(name = "fetchi", version, about = "Quality-gated web page to Markdown fetcher")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a page, convert it to Markdown and print the outcome as JSON
    Fetch {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// What the caller is looking for; carried through to the outcome
        #[arg(short, long)]
        query: Option<String>,

        /// Path to a JSON config file (falls back to FETCHI_CONFIG, then .fetchi.json)
        #[arg(short, long, env = "FETCHI_CONFIG")]
        config: Option<PathBuf>,

        /// Browser execution mode: local, docker or auto
        #[arg(short, long)]
        mode: Option<BrowserMode>,

        /// Skip the static attempt and render with the browser right away
        #[arg(long, default_value_t = false, conflicts_with = "no_fallback")]
        playwright: bool,

        /// Never escalate to the browser
        #[arg(long, default_value_t = false)]
        no_fallback: bool,
    },

    /// Score a local Markdown file and print the quality report
    Check {
        /// Markdown file to score
        file: PathBuf,

        /// Minimum score for the document to be valid (defaults to config)
        #[arg(long)]
        min_score: Option<u8>,

        /// Path to a JSON config file
        #[arg(short, long, env = "FETCHI_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fetchi=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            url,
            query,
            config,
            mode,
            playwright,
            no_fallback,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(mode) = mode {
                config.playwright.mode = mode;
            }
            if no_fallback {
                config.playwright.enabled = false;
            }
            cmd_fetch(&url, query, &config, playwright).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check {
            file,
            min_score,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let min_score = min_score.unwrap_or_else(|| RetryPolicy::from(&config).min_score);
            cmd_check(&file, min_score)
        }
    }
}

/// Resolve and load the config: explicit path, else `.fetchi.json` if present,
/// else defaults. An explicit path must exist.
fn load_config(explicit: Option<&Path>) -> Result<FetchiConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                bail!("Config file not found: {}", path.display());
            }
            path.to_path_buf()
        }
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };
    FetchiConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

async fn cmd_fetch(
    url: &str,
    query: Option<String>,
    config: &FetchiConfig,
    force_rendered: bool,
) -> Result<()> {
    let mut options = config.fetch_options();
    options.force_rendered = force_rendered;
    let request = FetchRequest::new(url, query, options)?;

    let static_fetcher = StaticFetcher::with_timeout(config.playwright.timeout())
        .context("Failed to create HTTP client")?;

    let outcome = run_pipeline(&request, config, static_fetcher).await?;

    tracing::info!(
        content_hash = %&outcome.content_hash[..8],
        score = outcome.quality_report.score,
        mode = %outcome.final_mode,
        "Fetch finished"
    );
    for warning in &outcome.warnings {
        tracing::warn!("{warning}");
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(feature = "browser")]
async fn run_pipeline(
    request: &FetchRequest,
    config: &FetchiConfig,
    static_fetcher: StaticFetcher,
) -> Result<FetchOutcome> {
    use std::sync::Arc;

    use fetchi_client::{ChromiumLauncher, RenderedFetcher};
    use fetchi_core::browser::BrowserManager;
    use fetchi_core::escalation::FetchService;

    let pw = &config.playwright;
    let manager = Arc::new(BrowserManager::new(
        ChromiumLauncher::new(pw.docker_image.clone()),
        pw.mode,
        pw.timeout(),
    ));
    let rendered = RenderedFetcher::new(Arc::clone(&manager), pw.wait_strategy, pw.timeout());
    let service = FetchService::with_renderer(static_fetcher, rendered, HtmdConverter::new());

    let result = tokio::select! {
        result = service.fetch(request) => Some(result),
        _ = shutdown_signal() => None,
    };

    // The browser never outlives the invocation, whatever the result.
    manager.release().await;

    match result {
        Some(outcome) => Ok(outcome?),
        None => bail!("Interrupted"),
    }
}

#[cfg(not(feature = "browser"))]
async fn run_pipeline(
    request: &FetchRequest,
    _config: &FetchiConfig,
    static_fetcher: StaticFetcher,
) -> Result<FetchOutcome> {
    use fetchi_core::escalation::FetchService;

    let service = FetchService::new(static_fetcher, HtmdConverter::new());
    tokio::select! {
        result = service.fetch(request) => Ok(result?),
        _ = shutdown_signal() => bail!("Interrupted"),
    }
}

/// Resolves on ctrl-c, or on SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                tracing::info!("Shutdown signal received");
                return;
            }
            Err(e) => tracing::warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

fn cmd_check(file: &Path, min_score: u8) -> Result<ExitCode> {
    let report = score_file(file, min_score)?;
    println!("{}", format_report(&report));

    Ok(if report.is_valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn score_file(file: &Path, min_score: u8) -> Result<QualityReport> {
    let markdown = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    Ok(QualityValidator::new(min_score).validate(&markdown))
}
