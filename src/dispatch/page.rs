//! Page and micro-batch execution
//!
//! Micro-batches of one page run concurrently. Inside a micro-batch every
//! file starts at once (in list order) and outcomes are recorded as they
//! finish. A micro-batch that hits its deadline cancels whatever is still in
//! flight and reports those files as failed.

use futures::future::try_join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BatchError, Dispatcher, FileOutcome, FileReport};
use crate::batch::micro_batches;
use crate::models::FileDescriptor;

/// Notified as each file finishes, in completion order
pub trait PageObserver: Send + Sync {
    fn file_finished(&self, report: &FileReport);
}

/// Observer that ignores everything
pub struct NoopObserver;

impl PageObserver for NoopObserver {
    fn file_finished(&self, _report: &FileReport) {}
}

/// Result of one pass over a page
#[derive(Debug)]
pub struct PageRun {
    /// Finished files in completion order
    pub reports: Vec<FileReport>,
    /// Set when the pass was cut short by a batch-level failure
    pub aborted: Option<BatchError>,
}

/// Records every report and forwards it
struct Collector<'a> {
    inner: &'a dyn PageObserver,
    reports: Mutex<Vec<FileReport>>,
}

impl Collector<'_> {
    fn record(&self, report: FileReport) {
        self.inner.file_finished(&report);
        if let Ok(mut reports) = self.reports.lock() {
            reports.push(report);
        }
    }
}

impl Dispatcher {
    /// Run one page: all micro-batches concurrently, bounded by `deadline`.
    ///
    /// Upstream rate limits abort the pass; `aborted` is then set and
    /// `reports` holds only what finished before.
    pub async fn dispatch_page(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        token: &CancellationToken,
        deadline: Instant,
        observer: &dyn PageObserver,
    ) -> PageRun {
        let collector = Collector {
            inner: observer,
            reports: Mutex::new(Vec::with_capacity(files.len())),
        };
        let page_token = token.child_token();
        let batches = micro_batches(files, &self.micro_batch);
        debug!(
            "Dispatching {} files in {} micro-batches",
            files.len(),
            batches.len()
        );

        let result = try_join_all(
            batches
                .into_iter()
                .map(|batch| self.run_micro_batch(root, batch, &page_token, deadline, &collector)),
        )
        .await;
        if result.is_err() {
            page_token.cancel();
        }

        PageRun {
            reports: collector.reports.into_inner().unwrap_or_default(),
            aborted: result.err(),
        }
    }

    async fn run_micro_batch(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        parent: &CancellationToken,
        request_deadline: Instant,
        collector: &Collector<'_>,
    ) -> Result<(), BatchError> {
        let token = parent.child_token();
        let deadline = request_deadline.min(Instant::now() + self.settings.micro_batch_budget());

        let mut pending: FuturesUnordered<_> = files
            .iter()
            .map(|file| {
                let token = token.clone();
                async move {
                    let outcome = self.analyze_file(root, file, &token, true).await;
                    (file, outcome)
                }
            })
            .collect();

        let mut finished = HashSet::new();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                next = pending.next() => match next {
                    None => return Ok(()),
                    Some((file, Ok(outcome))) => {
                        finished.insert(file.path.as_str());
                        log_outcome(&file.path, &outcome);
                        collector.record(FileReport { path: file.path.clone(), outcome });
                    }
                    Some((_, Err(e))) => {
                        warn!("Micro-batch aborted: {}", e);
                        token.cancel();
                        return Err(e);
                    }
                },
                _ = &mut sleep => {
                    token.cancel();
                    break;
                }
            }
        }

        drop(pending);
        for file in files.iter().filter(|f| !finished.contains(f.path.as_str())) {
            warn!("{} did not finish within the micro-batch budget", file.path);
            collector.record(FileReport {
                path: file.path.clone(),
                outcome: FileOutcome::Failed("timed out".to_string()),
            });
        }
        Ok(())
    }

    /// Second-chance pass: each file alone, one after another, with rate
    /// limits treated as ordinary unit failures.
    pub async fn sweep(
        &self,
        root: &Path,
        files: &[FileDescriptor],
        token: &CancellationToken,
        deadline: Instant,
        observer: &dyn PageObserver,
    ) -> Vec<FileReport> {
        info!("Second-chance sweep over {} files", files.len());
        let mut reports = Vec::with_capacity(files.len());

        for file in files {
            let outcome = if token.is_cancelled() || Instant::now() >= deadline {
                FileOutcome::Failed("request budget exhausted".to_string())
            } else {
                let file_token = token.child_token();
                match tokio::time::timeout_at(deadline, self.analyze_file(root, file, &file_token, false)).await {
                    Ok(Ok(outcome)) => outcome,
                    // Unreachable with propagation off, but keep the error text
                    Ok(Err(e)) => FileOutcome::Failed(e.to_string()),
                    Err(_) => {
                        file_token.cancel();
                        FileOutcome::Failed("timed out".to_string())
                    }
                }
            };
            log_outcome(&file.path, &outcome);
            let report = FileReport {
                path: file.path.clone(),
                outcome,
            };
            observer.file_finished(&report);
            reports.push(report);
        }
        reports
    }
}

fn log_outcome(path: &str, outcome: &FileOutcome) {
    match outcome {
        FileOutcome::Analyzed(result) => debug!("{}: {} issues", path, result.issues.len()),
        FileOutcome::NoResult => debug!("{}: no result", path),
        FileOutcome::Failed(reason) => warn!("{}: failed ({})", path, reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, AiResult, ModelClient};
    use crate::config::AppConfig;
    use crate::models::{AnalysisUnit, FileCategory};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::sync::Semaphore;

    /// Sleeps for `slow` on paths containing "slow", rate-limits on "limited"
    struct ScriptedModel;

    #[async_trait]
    impl ModelClient for ScriptedModel {
        async fn complete(&self, unit: &AnalysisUnit) -> AiResult<String> {
            if unit.path.contains("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if unit.path.contains("limited") {
                return Err(AiError::RateLimited { retry_after: None });
            }
            Ok(r#"{"issues": []}"#.into())
        }

        fn name(&self) -> String {
            "scripted".into()
        }
    }

    fn setup(names: &[&str]) -> (tempfile::TempDir, Vec<FileDescriptor>) {
        let dir = tempdir().unwrap();
        let files = names
            .iter()
            .map(|name| {
                std::fs::write(dir.path().join(name), "print(1)\n").unwrap();
                FileDescriptor {
                    path: name.to_string(),
                    size: 9,
                    extension: "py".into(),
                    category: FileCategory::Code,
                }
            })
            .collect();
        (dir, files)
    }

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(Arc::new(ScriptedModel), Arc::new(Semaphore::new(8)), &AppConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_file_fails_without_blocking_siblings() {
        let (dir, files) = setup(&["a.py", "slow.py", "b.py"]);
        let d = dispatcher();
        let run = d
            .dispatch_page(
                dir.path(),
                &files,
                &CancellationToken::new(),
                Instant::now() + Duration::from_secs(25),
                &NoopObserver,
            )
            .await;

        assert!(run.aborted.is_none());
        assert_eq!(run.reports.len(), 3);
        let slow = run.reports.iter().find(|r| r.path == "slow.py").unwrap();
        assert!(slow.outcome.is_failed());
        let fast: Vec<_> = run.reports.iter().filter(|r| r.path != "slow.py").collect();
        assert!(fast.iter().all(|r| matches!(r.outcome, FileOutcome::Analyzed(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_aborts_pass_and_sweep_recovers_others() {
        let (dir, files) = setup(&["a.py", "limited.py", "b.py"]);
        let d = dispatcher();
        let token = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(25);

        let run = d.dispatch_page(dir.path(), &files, &token, deadline, &NoopObserver).await;
        assert!(matches!(run.aborted, Some(BatchError::RateLimited { .. })));

        let swept = d.sweep(dir.path(), &files, &token, deadline, &NoopObserver).await;
        assert_eq!(swept.len(), 3);
        assert!(swept[1].outcome.is_failed());
        assert!(matches!(swept[0].outcome, FileOutcome::Analyzed(_)));
        assert!(matches!(swept[2].outcome, FileOutcome::Analyzed(_)));
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails_sweep_immediately() {
        let (dir, files) = setup(&["a.py"]);
        let d = dispatcher();
        let swept = d
            .sweep(dir.path(), &files, &CancellationToken::new(), Instant::now(), &NoopObserver)
            .await;
        assert!(swept[0].outcome.is_failed());
    }
}
