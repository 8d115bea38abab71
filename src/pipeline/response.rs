//! Wire types for one batch invocation

use serde::{Deserialize, Serialize};

use crate::models::{AnalysisResult, RepositoryHandle};

/// Request to start or continue an analysis
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub batch_index: usize,
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Session to fold this page into; generated when absent
    #[serde(default)]
    pub analysis_id: Option<String>,
}

impl BatchRequest {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, batch_index: usize) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            batch_index,
            batch_size: None,
            analysis_id: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_analysis_id(mut self, analysis_id: impl Into<String>) -> Self {
        self.analysis_id = Some(analysis_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub files_processed: usize,
    pub total_files: usize,
    pub percentage: f64,
}

/// Response for one page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub success: bool,
    pub analysis_id: String,
    pub batch_index: usize,
    pub repository: String,
    pub total_files_in_repo: usize,
    pub batch_start_index: usize,
    pub batch_end_index: usize,
    pub results: Vec<AnalysisResult>,
    pub has_more_batches: bool,
    pub next_batch_index: Option<usize>,
    pub progress: BatchProgress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_analysis: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_analyzed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_attempted: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_failed: Option<usize>,
}

impl BatchResponse {
    /// 200 when the call succeeded or recovered anything, else 500
    pub fn http_status(&self) -> u16 {
        if self.success || !self.results.is_empty() {
            200
        } else {
            500
        }
    }

    pub fn is_partial(&self) -> bool {
        self.partial_analysis.unwrap_or(false)
    }
}

/// Response for a repository warm-up
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareResponse {
    pub success: bool,
    pub repository: RepositoryHandle,
    pub total_files: usize,
}
