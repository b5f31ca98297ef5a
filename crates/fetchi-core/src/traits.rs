use std::future::Future;

use crate::error::AppError;
use crate::models::{ExtractedDocument, RawPage};

/// Fetches a page and returns its HTML.
///
/// Implemented by both the static HTTP fetcher and the rendered browser
/// fetcher; neither retries on its own.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<RawPage, AppError>> + Send;
}

/// Turns raw HTML into a title and Markdown.
///
/// Conversion is total: malformed input degrades instead of failing.
pub trait Converter: Send + Sync + Clone {
    fn convert(&self, page: &RawPage, request_url: &str) -> ExtractedDocument;
}

/// A rendered-path placeholder for services built without a browser.
#[derive(Debug, Clone)]
pub struct NoRenderer;

impl Fetcher for NoRenderer {
    async fn fetch(&self, _url: &str) -> Result<RawPage, AppError> {
        Err(AppError::BrowserUnavailableError(
            "rendering is not configured".into(),
        ))
    }
}
