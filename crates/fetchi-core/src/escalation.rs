use chrono::Utc;

use crate::error::{AppError, FetchError};
use crate::models::{
    ExtractedDocument, FetchOutcome, FetchRequest, QualityReport, RetryPolicy, SourceMode,
    compute_hash,
};
use crate::quality::QualityValidator;
use crate::traits::{Converter, Fetcher, NoRenderer};

/// One successful fetch + convert + validate pass.
#[derive(Debug, Clone)]
struct Attempt {
    document: ExtractedDocument,
    report: QualityReport,
    mode: SourceMode,
    final_url: String,
}

/// Decide whether a static result should be re-fetched with rendering.
///
/// Escalates only when rendering is permitted, the attempt budget is not
/// exhausted, and the result is invalid or scores strictly below
/// `js_retry_threshold`. A score equal to the threshold is accepted.
pub fn should_escalate(
    report: &QualityReport,
    policy: &RetryPolicy,
    rendering_permitted: bool,
    attempts_used: u32,
) -> bool {
    rendering_permitted
        && attempts_used < policy.max_attempts
        && (!report.is_valid || report.score < policy.js_retry_threshold)
}

/// Orchestrates the adaptive pipeline: static fetch → convert → validate →
/// optional rendered fetch → convert → revalidate → pick the better result.
pub struct FetchService<S, R, C>
where
    S: Fetcher,
    R: Fetcher,
    C: Converter,
{
    static_fetcher: S,
    rendered_fetcher: Option<R>,
    converter: C,
}

impl<S, C> FetchService<S, NoRenderer, C>
where
    S: Fetcher,
    C: Converter,
{
    /// Create a service that never renders.
    pub fn new(static_fetcher: S, converter: C) -> Self {
        Self {
            static_fetcher,
            rendered_fetcher: None,
            converter,
        }
    }
}

impl<S, R, C> FetchService<S, R, C>
where
    S: Fetcher,
    R: Fetcher,
    C: Converter,
{
    /// Create a service that can escalate to a rendered fetch.
    pub fn with_renderer(static_fetcher: S, rendered_fetcher: R, converter: C) -> Self {
        Self {
            static_fetcher,
            rendered_fetcher: Some(rendered_fetcher),
            converter,
        }
    }

    /// Run the pipeline for one request.
    ///
    /// Per-attempt failures are absorbed; an error is returned only when no
    /// attempt produced a document.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchOutcome, FetchError> {
        let opts = request.options();
        let policy = &opts.policy;
        let max_attempts = policy.max_attempts.max(1);
        let validator = QualityValidator::new(policy.min_score);
        let url = request.url();
        let renderer = self.rendered_fetcher.as_ref().filter(|_| opts.allow_rendering);

        let mut attempts = 0u32;
        let mut warnings = Vec::new();
        let mut best: Option<Attempt> = None;

        tracing::info!(request_id = %request.id(), %url, "Fetch requested");

        // Static attempt, unless rendering is forced.
        let escalate = if opts.force_rendered {
            if renderer.is_none() {
                return Err(FetchError::new(
                    AppError::BrowserUnavailableError(
                        "rendered fetch requested but rendering is not available".into(),
                    ),
                    attempts,
                ));
            }
            true
        } else {
            // With a renderer available, a failed static attempt escalates
            // instead of retrying the same mode.
            let retry_static = renderer.is_none();
            match self
                .attempt_mode(
                    &self.static_fetcher,
                    SourceMode::Static,
                    url,
                    &validator,
                    policy,
                    retry_static,
                    &mut attempts,
                )
                .await
            {
                Ok(attempt) => {
                    let escalate =
                        should_escalate(&attempt.report, policy, renderer.is_some(), attempts);
                    if escalate {
                        tracing::info!(
                            score = attempt.report.score,
                            is_valid = attempt.report.is_valid,
                            threshold = policy.js_retry_threshold,
                            "Static result below threshold, escalating to rendered fetch"
                        );
                    }
                    best = Some(attempt);
                    escalate
                }
                Err(e) if renderer.is_some() && attempts < max_attempts => {
                    tracing::warn!(error = %e, "Static fetch failed, escalating to rendered fetch");
                    warnings.push(format!("static fetch failed: {e}"));
                    true
                }
                Err(e) => return Err(FetchError::new(e, attempts)),
            }
        };

        if let (true, Some(renderer)) = (escalate, renderer) {
            match self
                .attempt_mode(
                    renderer,
                    SourceMode::Rendered,
                    url,
                    &validator,
                    policy,
                    true,
                    &mut attempts,
                )
                .await
            {
                Ok(rendered) => {
                    best = Some(match best.take() {
                        Some(previous) if previous.report.score >= rendered.report.score => {
                            tracing::info!(
                                static_score = previous.report.score,
                                rendered_score = rendered.report.score,
                                "Rendered result not better, keeping static"
                            );
                            previous
                        }
                        _ => rendered,
                    });
                }
                Err(e) if best.is_some() => {
                    tracing::warn!(error = %e, "Rendered fetch failed, keeping static result");
                    warnings.push(format!("rendering escalation failed: {e}"));
                }
                Err(e) => return Err(FetchError::new(e, attempts)),
            }
        }

        let Some(selected) = best else {
            return Err(FetchError::new(
                AppError::BrowserUnavailableError("no fetch attempt was possible".into()),
                attempts,
            ));
        };

        if selected.document.extraction_degraded {
            warnings.push("readable-content extraction fell back to raw body".to_string());
        }

        tracing::info!(
            mode = %selected.mode,
            score = selected.report.score,
            attempts,
            "Fetch complete"
        );

        Ok(FetchOutcome {
            request_id: request.id(),
            url: url.to_string(),
            final_url: selected.final_url,
            query: request.query().map(str::to_string),
            title: selected.document.title,
            content_hash: compute_hash(&selected.document.markdown_clean),
            markdown_clean: selected.document.markdown_clean,
            quality_report: selected.report,
            attempts_used: attempts,
            final_mode: selected.mode,
            warnings,
            fetched_at: Utc::now(),
        })
    }

    /// Fetch with one mode, retrying transient failures after the backoff
    /// while the budget allows.
    #[allow(clippy::too_many_arguments)]
    async fn attempt_mode<F: Fetcher>(
        &self,
        fetcher: &F,
        mode: SourceMode,
        url: &str,
        validator: &QualityValidator,
        policy: &RetryPolicy,
        retry_transient: bool,
        attempts: &mut u32,
    ) -> Result<Attempt, AppError> {
        loop {
            *attempts += 1;
            match self.attempt(fetcher, mode, url, validator, *attempts).await {
                Ok(attempt) => return Ok(attempt),
                Err(e) if retry_transient && e.is_transient() && *attempts < policy.max_attempts => {
                    let backoff_ms = policy.backoff.as_millis() as u64;
                    tracing::warn!(
                        %mode,
                        attempt = *attempts,
                        error = %e,
                        backoff_ms,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(policy.backoff).await;
                }
                Err(e) => {
                    tracing::warn!(%mode, attempt = *attempts, error = %e, "Attempt failed");
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<F: Fetcher>(
        &self,
        fetcher: &F,
        mode: SourceMode,
        url: &str,
        validator: &QualityValidator,
        attempt: u32,
    ) -> Result<Attempt, AppError> {
        tracing::info!(%mode, attempt, "Fetching {}", url);
        let page = fetcher.fetch(url).await?;
        tracing::info!(%mode, final_url = %page.final_url, "Fetched {} bytes of HTML", page.html.len());

        let document = self.converter.convert(&page, url);
        tracing::debug!(
            raw_len = document.markdown_raw.len(),
            clean_len = document.markdown_clean.len(),
            degraded = document.extraction_degraded,
            "Converted to Markdown"
        );

        let report = validator.validate(&document.markdown_clean);
        tracing::info!(
            %mode,
            score = report.score,
            is_valid = report.is_valid,
            "Validated"
        );

        Ok(Attempt {
            document,
            report,
            mode,
            final_url: page.final_url,
        })
    }
}
