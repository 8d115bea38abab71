//! Chunked analysis dispatch
//!
//! Turns files into model calls under layered budgets:
//!
//! - request: the whole page (default 25s)
//! - micro-batch: one parallel group of files (default 20s)
//! - call: one model call, raced against a timer (default 8s)
//!
//! Failed calls are bisected by [`recovery`]; pages and micro-batches live in
//! [`page`]. Every call takes a permit from a shared semaphore first, so the
//! number of in-flight model requests is bounded process-wide.

pub mod chunk;
pub mod page;
pub mod recovery;

pub use page::{NoopObserver, PageObserver, PageRun};

use futures::future::try_join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ai::{AiError, ModelClient};
use crate::config::{AppConfig, DispatchSettings, MicroBatchSettings, RecoverySettings};
use crate::models::{AnalysisResult, FileDescriptor};
use crate::repo::read_file;
use recovery::SpanOutcome;

/// Why a single unit call produced nothing
#[derive(Error, Debug)]
pub enum UnitError {
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Model(#[from] AiError),
}

/// Aborts a whole page pass
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    #[error("upstream rate limit while analyzing {file}")]
    RateLimited {
        file: String,
        retry_after: Option<u64>,
    },
}

/// What one file contributed
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    /// At least one unit produced a parsable response
    Analyzed(AnalysisResult),
    /// Every unit answered, but nothing usable came back (or nothing to send)
    NoResult,
    /// Every unit failed
    Failed(String),
}

impl FileOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed(_))
    }
}

/// One finished file
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub path: String,
    pub outcome: FileOutcome,
}

/// Dispatches files to a [`ModelClient`]
#[derive(Clone)]
pub struct Dispatcher {
    model: Arc<dyn ModelClient>,
    semaphore: Arc<Semaphore>,
    settings: DispatchSettings,
    recovery: RecoverySettings,
    micro_batch: MicroBatchSettings,
}

impl Dispatcher {
    pub fn new(model: Arc<dyn ModelClient>, semaphore: Arc<Semaphore>, config: &AppConfig) -> Self {
        Self {
            model,
            semaphore,
            settings: config.dispatch.clone(),
            recovery: config.recovery.clone(),
            micro_batch: config.micro_batch.clone(),
        }
    }

    /// Analyze one file: read, plan windows, run every window through recovery.
    ///
    /// With `propagate_rate_limit`, an upstream rate limit aborts with
    /// [`BatchError`]; otherwise it counts as an ordinary unit failure.
    pub async fn analyze_file(
        &self,
        root: &Path,
        file: &FileDescriptor,
        token: &CancellationToken,
        propagate_rate_limit: bool,
    ) -> Result<FileOutcome, BatchError> {
        let (root_buf, rel, max_bytes) = (root.to_path_buf(), file.path.clone(), self.settings.max_file_bytes);
        let content = match tokio::task::spawn_blocking(move || read_file(&root_buf, &rel, max_bytes)).await {
            Ok(Ok(Some(content))) => content,
            Ok(Ok(None)) => {
                debug!("Skipping binary file {}", file.path);
                return Ok(FileOutcome::NoResult);
            }
            Ok(Err(e)) => return Ok(FileOutcome::Failed(format!("read failed: {e}"))),
            Err(e) => return Ok(FileOutcome::Failed(format!("read task failed: {e}"))),
        };
        if content.truncated {
            debug!("{} truncated to {} bytes", file.path, max_bytes);
        }

        let spans = chunk::plan_spans(&file.path, &content.text, &self.settings);
        if spans.is_empty() {
            return Ok(FileOutcome::NoResult);
        }
        if spans.len() > 1 {
            debug!("{} split into {} windows", file.path, spans.len());
        }

        let outcomes = try_join_all(
            spans
                .into_iter()
                .map(|span| self.analyze_span(span, token.clone(), propagate_rate_limit)),
        )
        .await?;
        let merged = outcomes
            .into_iter()
            .fold(SpanOutcome::default(), SpanOutcome::merge);

        Ok(merged.into_file_outcome(&file.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::AiResult;
    use crate::models::{AnalysisUnit, FileCategory};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Answers every call with one issue on the unit's first line
    struct FirstLineModel {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for FirstLineModel {
        async fn complete(&self, _unit: &AnalysisUnit) -> AiResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"issues": [{"start_line": 1, "issue": "x", "error_type": "Style"}]}"#.into())
        }

        fn name(&self) -> String {
            "first-line".into()
        }
    }

    fn descriptor(path: &str, size: u64) -> FileDescriptor {
        FileDescriptor {
            path: path.into(),
            size,
            extension: "py".into(),
            category: FileCategory::Code,
        }
    }

    fn dispatcher(model: Arc<dyn ModelClient>) -> Dispatcher {
        Dispatcher::new(model, Arc::new(Semaphore::new(8)), &AppConfig::default())
    }

    #[tokio::test]
    async fn test_small_file_is_one_call() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.py"), "x = 1\ny = 2\n").unwrap();
        let model = Arc::new(FirstLineModel { calls: AtomicUsize::new(0) });
        let d = dispatcher(model.clone());

        let outcome = d
            .analyze_file(dir.path(), &descriptor("a.py", 12), &CancellationToken::new(), true)
            .await
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
        let FileOutcome::Analyzed(result) = outcome else {
            panic!("expected a result");
        };
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.file, "a.py");
    }

    #[tokio::test]
    async fn test_windowed_file_issues_are_offset() {
        let dir = tempdir().unwrap();
        let text: String = (1..=400).map(|i| format!("v{i} = {i}\n")).collect();
        std::fs::write(dir.path().join("big.py"), &text).unwrap();
        let model = Arc::new(FirstLineModel { calls: AtomicUsize::new(0) });
        let d = dispatcher(model.clone());

        let outcome = d
            .analyze_file(dir.path(), &descriptor("big.py", text.len() as u64), &CancellationToken::new(), true)
            .await
            .unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        let FileOutcome::Analyzed(result) = outcome else {
            panic!("expected a result");
        };
        let starts: Vec<u32> = result.issues.iter().map(|i| i.start_line).collect();
        assert_eq!(starts, vec![1, 176, 351]);
    }

    #[tokio::test]
    async fn test_empty_and_binary_files_are_no_result() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("empty.py"), "").unwrap();
        std::fs::write(dir.path().join("blob.py"), [0u8, 1, 2]).unwrap();
        let model = Arc::new(FirstLineModel { calls: AtomicUsize::new(0) });
        let d = dispatcher(model.clone());
        let token = CancellationToken::new();

        for name in ["empty.py", "blob.py"] {
            let outcome = d
                .analyze_file(dir.path(), &descriptor(name, 0), &token, true)
                .await
                .unwrap();
            assert_eq!(outcome, FileOutcome::NoResult);
        }
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_failed() {
        let dir = tempdir().unwrap();
        let d = dispatcher(Arc::new(FirstLineModel { calls: AtomicUsize::new(0) }));
        let outcome = d
            .analyze_file(dir.path(), &descriptor("gone.py", 1), &CancellationToken::new(), true)
            .await
            .unwrap();
        assert!(outcome.is_failed());
    }
}
