//! GitHub-backed repository materializer

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::github::GithubApi;
use super::{clone, estimate_time_label, extract, prune, validate_name, workspace};
use super::{DownloadProgress, DownloadStage, MaterializeError, ProgressFn, RepositorySource};
use crate::cache::{ensure_workspace_root, global_cache, repo_archive_path, repo_slug, repo_workspace_dir};
use crate::config::{GithubSettings, MaterializerSettings};
use crate::models::{AcquisitionStrategy, RepositoryHandle};

/// Fetches repositories from GitHub into a local workspace root.
///
/// Concurrent requests for the same repository are serialized; the second
/// one finds a fresh workspace and reuses it.
pub struct GithubMaterializer {
    settings: MaterializerSettings,
    clone_url: String,
    api: GithubApi,
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl GithubMaterializer {
    pub fn new(
        settings: MaterializerSettings,
        github: &GithubSettings,
        root: PathBuf,
    ) -> Result<Self, MaterializeError> {
        Ok(Self {
            settings,
            clone_url: github.clone_url.trim_end_matches('/').to_string(),
            api: GithubApi::new(github)?,
            root,
            locks: DashMap::new(),
        })
    }

    fn lock_for(&self, owner: &str, repo: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(repo_slug(owner, repo))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn fetch(
        &self,
        owner: &str,
        repo: &str,
        progress: &ProgressFn<'_>,
    ) -> Result<RepositoryHandle, MaterializeError> {
        progress(DownloadProgress::stage(DownloadStage::Initializing));
        ensure_workspace_root(&self.root)?;

        let meta = self.api.fetch_metadata(owner, repo).await?;
        let limit = self.settings.max_repo_bytes;
        if meta.size_bytes() > limit {
            return Err(MaterializeError::RepositoryTooLarge {
                size_bytes: meta.size_bytes(),
                limit_bytes: limit,
            });
        }
        debug!(
            "{} is ~{} bytes on branch {} ({})",
            meta.full_name,
            meta.size_bytes(),
            meta.default_branch,
            meta.language.as_deref().unwrap_or("unknown language")
        );

        let dest = repo_workspace_dir(&self.root, owner, repo);
        let revision = match self.settings.strategy {
            AcquisitionStrategy::Clone => {
                progress(DownloadProgress::stage(DownloadStage::Downloading));
                let url = format!("{}/{}/{}.git", self.clone_url, owner, repo);
                clone::shallow_clone(&url, &meta.default_branch, &dest).await?
            }
            AcquisitionStrategy::Archive | AcquisitionStrategy::Local => {
                let archive = repo_archive_path(&self.root, owner, repo);
                self.api
                    .download_archive(owner, repo, &meta.default_branch, &archive, limit, progress)
                    .await?;

                progress(DownloadProgress::stage(DownloadStage::Extracting));
                let (archive_path, dest_path) = (archive.clone(), dest.clone());
                tokio::task::spawn_blocking(move || extract::extract_archive(&archive_path, &dest_path))
                    .await
                    .map_err(|e| MaterializeError::Extraction(e.to_string()))??;
                if let Err(e) = tokio::fs::remove_file(&archive).await {
                    warn!("Failed to remove archive {}: {}", archive.display(), e);
                }
                None
            }
        };

        progress(DownloadProgress::stage(DownloadStage::Analyzing));
        let pruned_dir = dest.clone();
        let size_bytes = tokio::task::spawn_blocking(move || {
            let freed = prune::prune_heavy_dirs(&pruned_dir);
            if freed > 0 {
                debug!("Pruned {} bytes of dependency/build output", freed);
            }
            prune::dir_size(&pruned_dir)
        })
        .await
        .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))?;

        let handle = RepositoryHandle {
            owner: owner.to_string(),
            repo: repo.to_string(),
            local_path: dest,
            size_bytes,
            estimated_time: estimate_time_label(size_bytes, meta.language.as_deref()),
            language: meta.language,
            strategy: match self.settings.strategy {
                AcquisitionStrategy::Clone => AcquisitionStrategy::Clone,
                _ => AcquisitionStrategy::Archive,
            },
            revision,
            materialized_at: Utc::now(),
        };
        workspace::write_marker(&self.root, &handle)?;
        global_cache().invalidate(&handle.local_path);

        progress(DownloadProgress::stage(DownloadStage::Complete));
        info!(
            "Materialized {} ({} bytes, {})",
            handle.full_name(),
            handle.size_bytes,
            handle.estimated_time
        );
        Ok(handle)
    }
}

#[async_trait]
impl RepositorySource for GithubMaterializer {
    async fn materialize(
        &self,
        owner: &str,
        repo: &str,
        progress: &ProgressFn<'_>,
    ) -> Result<RepositoryHandle, MaterializeError> {
        validate_name("owner", owner)?;
        validate_name("repo", repo)?;

        let lock = self.lock_for(owner, repo);
        let _guard = lock.lock().await;

        if let Some(handle) = workspace::load_fresh(&self.root, owner, repo, self.settings.freshness()) {
            debug!("Reusing workspace for {}", handle.full_name());
            progress(DownloadProgress::stage(DownloadStage::Complete));
            return Ok(handle);
        }

        match self.fetch(owner, repo, progress).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                // Leave nothing half-written behind for the next attempt
                let _ = tokio::fs::remove_file(repo_archive_path(&self.root, owner, repo)).await;
                Err(e)
            }
        }
    }

    async fn cleanup(&self, owner: &str, repo: &str) -> Result<bool, MaterializeError> {
        validate_name("owner", owner)?;
        validate_name("repo", repo)?;
        let lock = self.lock_for(owner, repo);
        let _guard = lock.lock().await;

        let root = self.root.clone();
        let (o, r) = (owner.to_string(), repo.to_string());
        let removed = tokio::task::spawn_blocking(move || workspace::cleanup(&root, &o, &r))
            .await
            .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))??;
        global_cache().invalidate(&repo_workspace_dir(&self.root, owner, repo));
        Ok(removed)
    }

    async fn cleanup_expired(&self) -> Result<usize, MaterializeError> {
        let root = self.root.clone();
        let ttl = self.settings.ttl();
        tokio::task::spawn_blocking(move || workspace::cleanup_expired(&root, ttl))
            .await
            .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))?
    }
}
