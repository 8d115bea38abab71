//! Cumulative analysis sessions
//!
//! One logical analysis spans many page invocations. Each invocation folds
//! its progress and results into the session keyed by the analysis ID:
//!
//! - `results` and `errors` are append-only
//! - `progress` and `filesAnalyzed` never decrease
//! - `status` only moves forward; `failed` is reachable from any
//!   non-terminal state and terminal states stay terminal
//! - other scalars are last-write-wins

pub mod progress;
pub mod store;

pub use progress::Phase;
pub use store::InMemorySessionStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::AnalysisResult;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Initializing,
    Downloading,
    Extracting,
    Scanning,
    Analyzing,
    Completed,
    Failed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Initializing => 0,
            SessionStatus::Downloading => 1,
            SessionStatus::Extracting => 2,
            SessionStatus::Scanning => 3,
            SessionStatus::Analyzing => 4,
            SessionStatus::Completed | SessionStatus::Failed => 5,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }

    /// The status after requesting `next`, honouring forward-only moves
    pub fn advance(self, next: SessionStatus) -> SessionStatus {
        if self.is_terminal() {
            self
        } else if next == SessionStatus::Failed || next.rank() >= self.rank() {
            next
        } else {
            self
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Downloading => "downloading",
            SessionStatus::Extracting => "extracting",
            SessionStatus::Scanning => "scanning",
            SessionStatus::Analyzing => "analyzing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of one analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisSession {
    pub analysis_id: String,
    pub repository: Option<String>,
    pub status: SessionStatus,
    pub progress: f64,
    pub files_analyzed: usize,
    pub total_files: usize,
    pub current_file: Option<String>,
    pub results: Vec<AnalysisResult>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisSession {
    pub fn new(analysis_id: &str) -> Self {
        let now = Utc::now();
        Self {
            analysis_id: analysis_id.to_string(),
            repository: None,
            status: SessionStatus::default(),
            progress: 0.0,
            files_analyzed: 0,
            total_files: 0,
            current_file: None,
            results: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge an update into the session
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(status) = update.status {
            let next = self.status.advance(status);
            if next != self.status {
                tracing::debug!("Session {}: {} -> {}", self.analysis_id, self.status, next);
            }
            self.status = next;
        }
        if let Some(progress) = update.progress {
            self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        }
        if let Some(files_analyzed) = update.files_analyzed {
            self.files_analyzed = self.files_analyzed.max(files_analyzed);
        }
        if let Some(total_files) = update.total_files {
            self.total_files = total_files;
        }
        if let Some(repository) = update.repository {
            self.repository = Some(repository);
        }
        if update.current_file.is_some() {
            self.current_file = update.current_file;
        }
        self.results.extend(update.results);
        self.errors.extend(update.errors);
        self.updated_at = Utc::now();
    }
}

/// A partial change to a session. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub status: Option<SessionStatus>,
    pub progress: Option<f64>,
    pub files_analyzed: Option<usize>,
    pub total_files: Option<usize>,
    pub repository: Option<String>,
    pub current_file: Option<String>,
    pub results: Vec<AnalysisResult>,
    pub errors: Vec<String>,
}

impl SessionUpdate {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: f64) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
}

/// Keyed session storage. Implementations must apply updates to one
/// session atomically; unrelated sessions must not contend.
pub trait SessionStore: Send + Sync {
    fn get(&self, analysis_id: &str) -> Option<AnalysisSession>;

    /// Create-or-merge, returning the new snapshot
    fn update(&self, analysis_id: &str, update: SessionUpdate) -> AnalysisSession;

    fn append_error(&self, analysis_id: &str, error: String) {
        self.update(
            analysis_id,
            SessionUpdate {
                errors: vec![error],
                ..Default::default()
            },
        );
    }
}
