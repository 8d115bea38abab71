//! Repository materialization
//!
//! Turns an `(owner, repo)` pair into a local directory the pipeline can read:
//!
//! - [`GithubMaterializer`] downloads the codeload zip (or shallow-clones),
//!   strips the archive wrapper directory, prunes dependency/build trees and
//!   reuses a fresh workspace instead of re-fetching.
//! - [`LocalDirectory`] serves an existing checkout (CLI `--local`, tests).
//!
//! Both implement [`RepositorySource`], the only thing the pipeline sees.

pub mod clone;
pub mod extract;
pub mod github;
pub mod listing;
pub mod local;
pub mod materializer;
pub mod prune;
pub mod workspace;

pub use listing::{list_files, read_file, FileContent, RawEntry};
pub use local::{LocalDirectory, LocalLayout};
pub use materializer::GithubMaterializer;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::models::RepositoryHandle;

/// Errors that can occur while acquiring repository content.
///
/// All of these are fatal for the session that triggered them.
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Invalid repository name: {0}")]
    InvalidName(String),

    #[error("Repository {owner}/{repo} not found")]
    NotFound { owner: String, repo: String },

    #[error("Repository is too large: {size_bytes} bytes exceeds the {limit_bytes} byte limit")]
    RepositoryTooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("GitHub API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Clone failed: {0}")]
    Clone(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MaterializeError {
    /// Machine-readable kind, surfaced in HTTP error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            MaterializeError::InvalidName(_) => "invalid_name",
            MaterializeError::NotFound { .. } => "not_found",
            MaterializeError::RepositoryTooLarge { .. } => "repository_too_large",
            MaterializeError::Api { .. } => "github_api",
            MaterializeError::Download(_) => "download",
            MaterializeError::Extraction(_) => "extraction",
            MaterializeError::Clone(_) => "clone",
            MaterializeError::Io(_) => "io",
        }
    }
}

/// Discrete acquisition stages, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
    Initializing,
    Downloading,
    Extracting,
    Analyzing,
    Complete,
}

/// Snapshot of acquisition progress
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub stage: DownloadStage,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub bytes_per_sec: f64,
    pub eta_secs: Option<f64>,
}

impl DownloadProgress {
    pub fn stage(stage: DownloadStage) -> Self {
        Self {
            stage,
            downloaded_bytes: 0,
            total_bytes: None,
            bytes_per_sec: 0.0,
            eta_secs: None,
        }
    }

    /// Fraction of the download done, if the total is known
    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

/// Progress callback handed to [`RepositorySource::materialize`]
pub type ProgressFn<'a> = dyn Fn(DownloadProgress) + Send + Sync + 'a;

/// Something that can produce a local copy of a repository
#[async_trait]
pub trait RepositorySource: Send + Sync {
    async fn materialize(
        &self,
        owner: &str,
        repo: &str,
        progress: &ProgressFn<'_>,
    ) -> Result<RepositoryHandle, MaterializeError>;

    /// Remove any local copy of the repository. Returns true if something was removed.
    async fn cleanup(&self, _owner: &str, _repo: &str) -> Result<bool, MaterializeError> {
        Ok(false)
    }

    /// Remove local copies older than the configured TTL. Returns how many were removed.
    async fn cleanup_expired(&self) -> Result<usize, MaterializeError> {
        Ok(0)
    }
}

/// Reject owner/repo names that could escape the workspace or break URLs
pub fn validate_name(kind: &str, name: &str) -> Result<(), MaterializeError> {
    let valid = !name.is_empty()
        && name.len() <= 100
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(MaterializeError::InvalidName(format!("{kind} '{name}'")))
    }
}

/// Human label for how long an analysis is likely to take.
///
/// Rough model: ~20 MB of repository per minute, scaled by how file-heavy
/// the dominant language's ecosystems tend to be.
pub fn estimate_time_label(size_bytes: u64, language: Option<&str>) -> String {
    let factor = match language.map(|l| l.to_ascii_lowercase()).as_deref() {
        Some("javascript") | Some("typescript") => 1.3,
        Some("java") | Some("c#") | Some("c++") | Some("kotlin") => 1.2,
        Some("python") | Some("go") | Some("ruby") | Some("rust") => 1.0,
        _ => 1.1,
    };
    let megabytes = size_bytes as f64 / (1024.0 * 1024.0);
    let minutes = megabytes * factor / 20.0;

    let label = if minutes < 1.0 {
        "under 1 minute"
    } else if minutes < 2.0 {
        "1-2 minutes"
    } else if minutes < 5.0 {
        "2-5 minutes"
    } else if minutes < 10.0 {
        "5-10 minutes"
    } else {
        "over 10 minutes"
    };
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("owner", "rust-lang").is_ok());
        assert!(validate_name("repo", "my_repo.rs").is_ok());
        assert!(validate_name("repo", "..").is_err());
        assert!(validate_name("repo", "a/b").is_err());
        assert!(validate_name("repo", "").is_err());
    }

    #[test]
    fn test_estimate_time_label() {
        assert_eq!(estimate_time_label(1024, None), "under 1 minute");
        assert_eq!(estimate_time_label(30 * 1024 * 1024, Some("Python")), "1-2 minutes");
        assert_eq!(
            estimate_time_label(300 * 1024 * 1024, Some("JavaScript")),
            "over 10 minutes"
        );
    }

    #[test]
    fn test_progress_fraction() {
        let mut p = DownloadProgress::stage(DownloadStage::Downloading);
        assert_eq!(p.fraction(), None);
        p.total_bytes = Some(200);
        p.downloaded_bytes = 50;
        assert_eq!(p.fraction(), Some(0.25));
        p.downloaded_bytes = 500;
        assert_eq!(p.fraction(), Some(1.0));
    }

    #[test]
    fn test_error_kinds() {
        let err = MaterializeError::RepositoryTooLarge {
            size_bytes: 2,
            limit_bytes: 1,
        };
        assert_eq!(err.kind(), "repository_too_large");
        assert!(err.to_string().contains("exceeds"));
    }
}
