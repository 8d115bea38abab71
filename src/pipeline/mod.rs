//! Batch orchestration
//!
//! One call to [`AnalysisPipeline::run_batch`] processes exactly one page:
//!
//! 1. Materialize the repository (reused when fresh)
//! 2. List and order the selectable files (listing cached per workspace)
//! 3. Slice out the requested page
//! 4. Dispatch it in micro-batches under the request budget
//! 5. On a batch-level failure, back off and sweep the page file by file
//! 6. Fold outcomes into the session and answer with this page's results
//!
//! The client paces the analysis by asking for the next page.

mod response;

pub use response::{BatchProgress, BatchRequest, BatchResponse, PrepareResponse};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ai::ModelClient;
use crate::batch::partition;
use crate::cache::global_cache;
use crate::config::AppConfig;
use crate::dispatch::{Dispatcher, FileOutcome, FileReport, PageObserver};
use crate::models::{FileDescriptor, RepositoryHandle};
use crate::repo::{list_files, DownloadProgress, DownloadStage, MaterializeError, RepositorySource};
use crate::selector::select;
use crate::status::{AnalysisSession, Phase, SessionStatus, SessionStore, SessionUpdate};

/// Errors that end a batch call before any file is analyzed
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error("Failed to list repository files: {0}")]
    Listing(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Materialize(e) => e.kind(),
            PipelineError::Listing(_) => "listing",
            PipelineError::InvalidRequest(_) => "invalid_request",
        }
    }
}

pub struct AnalysisPipeline {
    config: AppConfig,
    source: Arc<dyn RepositorySource>,
    model: Arc<dyn ModelClient>,
    sessions: Arc<dyn SessionStore>,
    dispatcher: Dispatcher,
}

impl AnalysisPipeline {
    pub fn new(
        config: AppConfig,
        source: Arc<dyn RepositorySource>,
        model: Arc<dyn ModelClient>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.dispatch.max_concurrent_calls.max(1)));
        let dispatcher = Dispatcher::new(Arc::clone(&model), semaphore, &config);
        Self {
            config,
            source,
            model,
            sessions,
            dispatcher,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn model_name(&self) -> String {
        self.model.name()
    }

    pub fn session(&self, analysis_id: &str) -> Option<AnalysisSession> {
        self.sessions.get(analysis_id)
    }

    /// Process one page of an analysis
    pub async fn run_batch(
        &self,
        request: BatchRequest,
        token: &CancellationToken,
    ) -> Result<BatchResponse, PipelineError> {
        let deadline = Instant::now() + self.config.dispatch.request_budget();
        let batch_size = self.batch_size(request.batch_size)?;
        let analysis_id = request
            .analysis_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let repository = format!("{}/{}", request.owner, request.repo);

        self.sessions.update(
            &analysis_id,
            SessionUpdate {
                status: Some(SessionStatus::Initializing),
                repository: Some(repository.clone()),
                ..Default::default()
            },
        );

        let handle = self
            .materialize_tracked(&analysis_id, &request.owner, &request.repo)
            .await?;

        self.sessions.update(
            &analysis_id,
            SessionUpdate::status(SessionStatus::Scanning).with_progress(Phase::Scan.scale(0, 1)),
        );
        let files = match self.selected_files(&handle).await {
            Ok(files) => files,
            Err(e) => {
                self.fail_session(&analysis_id, &e.to_string());
                return Err(e);
            }
        };

        let total = files.len();
        let page = partition(total, request.batch_index, batch_size);
        info!(
            "{} page {}: files {}..{} of {}",
            repository, page.batch_index, page.start, page.end, total
        );
        self.sessions.update(
            &analysis_id,
            SessionUpdate {
                status: Some(SessionStatus::Analyzing),
                total_files: Some(total),
                progress: Some(Phase::Scan.scale(1, 1)),
                ..Default::default()
            },
        );

        let slice = page.slice(&files);
        let observer = SessionObserver {
            sessions: &*self.sessions,
            analysis_id: &analysis_id,
            processed_before: page.start,
            total,
            seen: Mutex::new(HashSet::new()),
        };

        let run = self
            .dispatcher
            .dispatch_page(&handle.local_path, slice, token, deadline, &observer)
            .await;
        let mut reports = run.reports;
        let batch_error = run.aborted;

        if let Some(err) = &batch_error {
            warn!("Batch {} of {} aborted: {}", page.batch_index, repository, err);
            self.sessions.append_error(&analysis_id, err.to_string());
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(self.config.dispatch.rate_limit_backoff()) => {}
            }

            // Keep what already finished cleanly; everything else gets a second chance
            reports.retain(|r| !r.outcome.is_failed());
            let done: HashSet<&str> = reports.iter().map(|r| r.path.as_str()).collect();
            let retry: Vec<FileDescriptor> = slice
                .iter()
                .filter(|f| !done.contains(f.path.as_str()))
                .cloned()
                .collect();
            let swept = self
                .dispatcher
                .sweep(&handle.local_path, &retry, token, deadline, &observer)
                .await;
            reports.extend(swept);
        }

        let percentage = Phase::Analysis.scale(page.end, total);
        let response = build_response(
            analysis_id,
            repository,
            &page,
            reports,
            batch_error.map(|e| e.to_string()),
            percentage,
        );

        // A last page that recovered nothing ends the analysis as failed
        let status = match (page.has_more, response.success) {
            (true, _) => None,
            (false, true) => Some(SessionStatus::Completed),
            (false, false) => Some(SessionStatus::Failed),
        };
        let finished = SessionUpdate {
            status,
            progress: Some(percentage),
            files_analyzed: Some(page.end),
            ..Default::default()
        };
        self.sessions.update(&response.analysis_id, finished);

        Ok(response)
    }

    /// Materialize ahead of the first page
    pub async fn prepare(&self, owner: &str, repo: &str) -> Result<PrepareResponse, PipelineError> {
        let handle = self.source.materialize(owner, repo, &|_: DownloadProgress| {}).await?;
        let files = self.selected_files(&handle).await?;
        Ok(PrepareResponse {
            success: true,
            total_files: files.len(),
            repository: handle,
        })
    }

    /// Drop the local copy of a repository
    pub async fn cleanup(&self, owner: &str, repo: &str) -> Result<bool, PipelineError> {
        Ok(self.source.cleanup(owner, repo).await?)
    }

    pub async fn cleanup_expired(&self) -> Result<usize, PipelineError> {
        Ok(self.source.cleanup_expired().await?)
    }

    fn batch_size(&self, requested: Option<usize>) -> Result<usize, PipelineError> {
        let settings = &self.config.batch;
        match requested {
            None => Ok(settings.default_batch_size),
            Some(0) => Err(PipelineError::InvalidRequest(
                "batchSize must be at least 1".to_string(),
            )),
            Some(n) => Ok(n.min(settings.max_batch_size)),
        }
    }

    async fn materialize_tracked(
        &self,
        analysis_id: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RepositoryHandle, PipelineError> {
        let sessions = &*self.sessions;
        let report = |p: DownloadProgress| {
            let (status, fraction) = match p.stage {
                DownloadStage::Initializing => (SessionStatus::Initializing, 0.0),
                DownloadStage::Downloading => {
                    (SessionStatus::Downloading, p.fraction().unwrap_or(0.0) * 0.8)
                }
                DownloadStage::Extracting => (SessionStatus::Extracting, 0.8),
                DownloadStage::Analyzing => (SessionStatus::Extracting, 0.92),
                DownloadStage::Complete => (SessionStatus::Extracting, 1.0),
            };
            sessions.update(
                analysis_id,
                SessionUpdate::status(status).with_progress(Phase::Download.scale_fraction(fraction)),
            );
        };

        match self.source.materialize(owner, repo, &report).await {
            Ok(handle) => {
                debug!("Using {} at {}", handle.full_name(), handle.local_path.display());
                Ok(handle)
            }
            Err(e) => {
                warn!("Materializing {}/{} failed: {}", owner, repo, e);
                self.fail_session(analysis_id, &e.to_string());
                Err(e.into())
            }
        }
    }

    fn fail_session(&self, analysis_id: &str, error: &str) {
        self.sessions.update(
            analysis_id,
            SessionUpdate {
                status: Some(SessionStatus::Failed),
                errors: vec![error.to_string()],
                ..Default::default()
            },
        );
    }

    /// Ordered selectable files, from the listing cache when possible
    async fn selected_files(&self, handle: &RepositoryHandle) -> Result<Vec<FileDescriptor>, PipelineError> {
        let cache = global_cache();
        let entries = match cache.get(&handle.local_path, handle.materialized_at) {
            Some(entries) => entries,
            None => {
                let root = handle.local_path.clone();
                let listed = tokio::task::spawn_blocking(move || list_files(&root))
                    .await
                    .map_err(|e| PipelineError::Listing(e.to_string()))?
                    .map_err(|e| PipelineError::Listing(e.to_string()))?;
                cache.insert(&handle.local_path, handle.materialized_at, listed)
            }
        };
        Ok(select(&entries))
    }
}

/// Streams finished files into the session as they complete
struct SessionObserver<'a> {
    sessions: &'a dyn SessionStore,
    analysis_id: &'a str,
    processed_before: usize,
    total: usize,
    seen: Mutex<HashSet<String>>,
}

impl PageObserver for SessionObserver<'_> {
    fn file_finished(&self, report: &FileReport) {
        let processed = match self.seen.lock() {
            Ok(mut seen) => {
                seen.insert(report.path.clone());
                self.processed_before + seen.len()
            }
            Err(_) => self.processed_before,
        };

        let mut update = SessionUpdate {
            current_file: Some(report.path.clone()),
            files_analyzed: Some(processed),
            progress: Some(Phase::Analysis.scale(processed, self.total)),
            ..Default::default()
        };
        match &report.outcome {
            FileOutcome::Analyzed(result) => update.results.push(result.clone()),
            FileOutcome::Failed(reason) => update.errors.push(format!("{}: {}", report.path, reason)),
            FileOutcome::NoResult => {}
        }
        self.sessions.update(self.analysis_id, update);
    }
}

fn build_response(
    analysis_id: String,
    repository: String,
    page: &crate::batch::Page,
    reports: Vec<FileReport>,
    batch_error: Option<String>,
    percentage: f64,
) -> BatchResponse {
    let attempted = page.len();
    let failed = reports.iter().filter(|r| r.outcome.is_failed()).count();
    let finished = reports.len() - failed;
    let results = reports
        .into_iter()
        .filter_map(|r| match r.outcome {
            FileOutcome::Analyzed(result) => Some(result),
            _ => None,
        })
        .collect::<Vec<_>>();

    let mut response = BatchResponse {
        success: true,
        analysis_id,
        batch_index: page.batch_index,
        repository,
        total_files_in_repo: page.total,
        batch_start_index: page.start,
        batch_end_index: page.end,
        results,
        has_more_batches: page.has_more,
        next_batch_index: page.next_batch_index,
        progress: BatchProgress {
            files_processed: page.end,
            total_files: page.total,
            percentage,
        },
        error: None,
        partial_analysis: None,
        files_analyzed: None,
        files_attempted: None,
        files_failed: None,
    };

    // A batch error the sweep fully recovered from is not a failure
    if failed > 0 {
        response.success = !response.results.is_empty();
        response.error = Some(batch_error.unwrap_or_else(|| {
            format!("{failed} of {attempted} files could not be analyzed")
        }));
        response.partial_analysis = Some(true);
        response.files_analyzed = Some(finished);
        response.files_attempted = Some(attempted);
        response.files_failed = Some(failed);
    }
    response
}
