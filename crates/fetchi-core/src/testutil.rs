//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::sync::{Arc, Mutex};

use crate::error::AppError;
use crate::models::{ExtractedDocument, RawPage, SourceMode};
use crate::traits::{Converter, Fetcher};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

/// Mock fetcher that replays a queue of responses.
#[derive(Clone)]
pub struct MockFetcher {
    mode: SourceMode,
    /// Queue of responses. Each call pops the first element.
    /// If empty, returns a default HTML string.
    responses: Arc<Mutex<Vec<Result<String, AppError>>>>,
    /// URLs requested so far.
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    pub fn new(mode: SourceMode, html: &str) -> Self {
        Self::with_responses(mode, vec![Ok(html.to_string())])
    }

    pub fn with_error(mode: SourceMode, error: AppError) -> Self {
        Self::with_responses(mode, vec![Err(error)])
    }

    pub fn with_responses(mode: SourceMode, responses: Vec<Result<String, AppError>>) -> Self {
        Self {
            mode,
            responses: Arc::new(Mutex::new(responses)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<RawPage, AppError> {
        self.calls.lock().unwrap().push(url.to_string());
        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok("<html><body>default</body></html>".to_string())
            } else {
                responses.remove(0)
            }
        };
        next.map(|html| RawPage {
            html,
            final_url: url.to_string(),
            source_mode: self.mode,
        })
    }
}

// ---------------------------------------------------------------------------
// MockConverter
// ---------------------------------------------------------------------------

/// Mock converter that treats the page body as already-clean Markdown.
#[derive(Clone, Default)]
pub struct MockConverter {
    degraded: bool,
}

impl MockConverter {
    /// Creates a converter that returns the input unchanged.
    pub fn passthrough() -> Self {
        Self { degraded: false }
    }

    /// Like [`passthrough`](Self::passthrough) but flags every document as
    /// a raw-body fallback.
    pub fn degraded() -> Self {
        Self { degraded: true }
    }
}

impl Converter for MockConverter {
    fn convert(&self, page: &RawPage, request_url: &str) -> ExtractedDocument {
        ExtractedDocument {
            title: request_url.to_string(),
            markdown_raw: page.html.clone(),
            markdown_clean: page.html.clone(),
            extraction_degraded: self.degraded,
        }
    }
}
