//! Recursive failure recovery
//!
//! A unit whose call fails is cut in half and each half retried on its own,
//! down to a depth bound and a line floor. One half failing never affects
//! the other; a half that cannot be split further contributes nothing.

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::chunk::Span;
use super::{BatchError, Dispatcher, FileOutcome, UnitError};
use crate::ai::{response::parse_issues, AiError};
use crate::models::{AnalysisResult, Issue};

/// Aggregate of the leaf units under one span
#[derive(Debug, Default)]
pub struct SpanOutcome {
    /// Issues in original-file coordinates
    pub issues: Vec<Issue>,
    pub parsed: usize,
    pub empty: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

impl SpanOutcome {
    fn parsed(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            parsed: 1,
            ..Default::default()
        }
    }

    fn empty() -> Self {
        Self {
            empty: 1,
            ..Default::default()
        }
    }

    fn failed(error: String) -> Self {
        Self {
            failed: 1,
            last_error: Some(error),
            ..Default::default()
        }
    }

    pub fn merge(mut self, other: SpanOutcome) -> Self {
        self.issues.extend(other.issues);
        self.parsed += other.parsed;
        self.empty += other.empty;
        self.failed += other.failed;
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
        self
    }

    /// Failed only if every leaf failed; analyzed if any leaf parsed
    pub fn into_file_outcome(mut self, path: &str) -> FileOutcome {
        if self.parsed > 0 {
            self.issues
                .sort_by(|a, b| (a.start_line, a.end_line).cmp(&(b.start_line, b.end_line)));
            FileOutcome::Analyzed(AnalysisResult::new(path, self.issues))
        } else if self.failed > 0 && self.empty == 0 {
            FileOutcome::Failed(
                self.last_error
                    .unwrap_or_else(|| "all analysis attempts failed".to_string()),
            )
        } else {
            FileOutcome::NoResult
        }
    }
}

impl Dispatcher {
    /// Attempt `span`, bisecting on failure.
    ///
    /// Returned issues are already shifted into original-file coordinates.
    pub fn analyze_span(
        &self,
        span: Span,
        token: CancellationToken,
        propagate_rate_limit: bool,
    ) -> BoxFuture<'_, Result<SpanOutcome, BatchError>> {
        async move {
            let error = match self.attempt(&span, &token).await {
                Ok(raw) => {
                    let unit = span.to_unit();
                    return Ok(match parse_issues(&raw, &unit) {
                        Some(issues) => SpanOutcome::parsed(
                            issues
                                .into_iter()
                                .map(|i| i.shifted(span.line_offset()))
                                .collect(),
                        ),
                        None => {
                            debug!(
                                "No usable response for {} lines {}-{}",
                                span.path,
                                span.start_line(),
                                span.end_line()
                            );
                            SpanOutcome::empty()
                        }
                    });
                }
                Err(UnitError::Model(AiError::RateLimited { retry_after })) if propagate_rate_limit => {
                    return Err(BatchError::RateLimited {
                        file: span.path.to_string(),
                        retry_after,
                    });
                }
                Err(UnitError::Cancelled) => {
                    return Ok(SpanOutcome::failed(UnitError::Cancelled.to_string()));
                }
                Err(e) => e,
            };

            let can_split = span.depth < self.recovery.max_depth
                && span.len > self.recovery.min_lines as usize;
            if !can_split {
                warn!(
                    "Giving up on {} lines {}-{} at depth {}: {}",
                    span.path,
                    span.start_line(),
                    span.end_line(),
                    span.depth,
                    error
                );
                return Ok(SpanOutcome::failed(error.to_string()));
            }

            let (first, second) = span.bisect();
            debug!(
                "Bisecting {} lines {}-{} (depth {}) after: {}",
                span.path,
                span.start_line(),
                span.end_line(),
                span.depth,
                error
            );
            let (a, b) = tokio::join!(
                self.analyze_span(first, token.clone(), propagate_rate_limit),
                self.analyze_span(second, token, propagate_rate_limit),
            );
            Ok(a?.merge(b?))
        }
        .boxed()
    }

    /// One model call for one span: permit, then the call raced against the timer
    async fn attempt(&self, span: &Span, token: &CancellationToken) -> Result<String, UnitError> {
        let _permit = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(UnitError::Cancelled),
            permit = self.semaphore.acquire() => permit.map_err(|_| UnitError::Cancelled)?,
        };

        let unit = span.to_unit();
        let budget = self.settings.file_budget();
        // Dropping the call future on timeout or cancellation aborts the request
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(UnitError::Cancelled),
            result = tokio::time::timeout(budget, self.model.complete(&unit)) => match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(e)) => Err(UnitError::Model(e)),
                Err(_) => Err(UnitError::Timeout(budget)),
            },
        }
    }
}
