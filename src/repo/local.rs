//! Serve repositories that already exist on disk

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

use super::{clone::head_revision, estimate_time_label, prune::dir_size, validate_name};
use super::{DownloadProgress, DownloadStage, MaterializeError, ProgressFn, RepositorySource};
use crate::models::{AcquisitionStrategy, RepositoryHandle};

/// How `(owner, repo)` maps onto the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalLayout {
    /// The root is the repository, whatever name is asked for
    Single,
    /// Repositories live at `{root}/{owner}/{repo}`
    PerRepo,
}

/// A [`RepositorySource`] over a local directory. Never downloads or deletes.
pub struct LocalDirectory {
    root: PathBuf,
    layout: LocalLayout,
    created_at: DateTime<Utc>,
}

impl LocalDirectory {
    pub fn new(root: impl Into<PathBuf>, layout: LocalLayout) -> Self {
        Self {
            root: root.into(),
            layout,
            created_at: Utc::now(),
        }
    }

    pub fn single(root: impl Into<PathBuf>) -> Self {
        Self::new(root, LocalLayout::Single)
    }

    fn path_for(&self, owner: &str, repo: &str) -> PathBuf {
        match self.layout {
            LocalLayout::Single => self.root.clone(),
            LocalLayout::PerRepo => self.root.join(owner).join(repo),
        }
    }
}

#[async_trait]
impl RepositorySource for LocalDirectory {
    async fn materialize(
        &self,
        owner: &str,
        repo: &str,
        progress: &ProgressFn<'_>,
    ) -> Result<RepositoryHandle, MaterializeError> {
        validate_name("owner", owner)?;
        validate_name("repo", repo)?;

        let path = self.path_for(owner, repo);
        if !path.is_dir() {
            return Err(MaterializeError::NotFound {
                owner: owner.to_string(),
                repo: repo.to_string(),
            });
        }

        progress(DownloadProgress::stage(DownloadStage::Analyzing));
        let measured = path.clone();
        let (size_bytes, revision) =
            tokio::task::spawn_blocking(move || (dir_size(&measured), head_revision(&measured)))
                .await
                .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))?;
        progress(DownloadProgress::stage(DownloadStage::Complete));

        Ok(RepositoryHandle {
            owner: owner.to_string(),
            repo: repo.to_string(),
            local_path: path,
            size_bytes,
            language: None,
            estimated_time: estimate_time_label(size_bytes, None),
            strategy: AcquisitionStrategy::Local,
            revision,
            // Stable across calls so the listing cache stays valid
            materialized_at: self.created_at,
        })
    }
}
