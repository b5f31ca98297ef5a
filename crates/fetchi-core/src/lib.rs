pub mod browser;
pub mod config;
pub mod error;
pub mod escalation;
pub mod markdown;
pub mod models;
pub mod quality;
pub mod traits;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use browser::{BrowserHandle, BrowserLauncher, BrowserManager, ExecutionMode};
pub use config::FetchiConfig;
pub use error::{AppError, ErrorKind, FetchError};
pub use escalation::{FetchService, should_escalate};
pub use markdown::cleanup;
pub use models::{
    ExtractedDocument, FetchOptions, FetchOutcome, FetchRequest, QualityReport, RawPage,
    RetryPolicy, SourceMode, compute_hash,
};
pub use quality::{QualityValidator, format_report};
pub use traits::{Converter, Fetcher, NoRenderer};
