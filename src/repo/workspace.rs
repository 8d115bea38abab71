//! Workspace markers and lifecycle
//!
//! Each materialized repository gets a sibling `{slug}.marker.json` recording
//! when and how it was fetched. The marker is written last, so a workspace
//! without one is treated as incomplete and re-fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{repo_archive_path, repo_slug, repo_workspace_dir};
use crate::models::{AcquisitionStrategy, RepositoryHandle};

use super::{estimate_time_label, MaterializeError};

const MARKER_SUFFIX: &str = ".marker.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceMarker {
    pub owner: String,
    pub repo: String,
    pub size_bytes: u64,
    #[serde(default)]
    pub language: Option<String>,
    pub strategy: AcquisitionStrategy,
    #[serde(default)]
    pub revision: Option<String>,
    pub materialized_at: DateTime<Utc>,
}

impl WorkspaceMarker {
    pub fn from_handle(handle: &RepositoryHandle) -> Self {
        Self {
            owner: handle.owner.clone(),
            repo: handle.repo.clone(),
            size_bytes: handle.size_bytes,
            language: handle.language.clone(),
            strategy: handle.strategy,
            revision: handle.revision.clone(),
            materialized_at: handle.materialized_at,
        }
    }

    fn into_handle(self, local_path: PathBuf) -> RepositoryHandle {
        RepositoryHandle {
            estimated_time: estimate_time_label(self.size_bytes, self.language.as_deref()),
            owner: self.owner,
            repo: self.repo,
            local_path,
            size_bytes: self.size_bytes,
            language: self.language,
            strategy: self.strategy,
            revision: self.revision,
            materialized_at: self.materialized_at,
        }
    }
}

fn marker_path(root: &Path, owner: &str, repo: &str) -> PathBuf {
    root.join(format!("{}{}", repo_slug(owner, repo), MARKER_SUFFIX))
}

/// Handle for an existing workspace if it is complete and younger than `freshness`
pub fn load_fresh(
    root: &Path,
    owner: &str,
    repo: &str,
    freshness: Duration,
) -> Option<RepositoryHandle> {
    let dir = repo_workspace_dir(root, owner, repo);
    if !dir.is_dir() {
        return None;
    }
    let marker = read_marker(&marker_path(root, owner, repo))?;
    let age = Utc::now().signed_duration_since(marker.materialized_at);
    let fresh = age
        .to_std()
        .map(|age| age < freshness)
        // Marker from the future (clock skew): treat as fresh
        .unwrap_or(true);
    if !fresh {
        tracing::debug!("Workspace for {}/{} is stale ({}s old)", owner, repo, age.num_seconds());
        return None;
    }
    Some(marker.into_handle(dir))
}

fn read_marker(path: &Path) -> Option<WorkspaceMarker> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(marker) => Some(marker),
        Err(e) => {
            tracing::warn!("Ignoring unreadable workspace marker {}: {}", path.display(), e);
            None
        }
    }
}

pub fn write_marker(root: &Path, handle: &RepositoryHandle) -> Result<(), MaterializeError> {
    let marker = WorkspaceMarker::from_handle(handle);
    let json = serde_json::to_string_pretty(&marker)
        .map_err(|e| MaterializeError::Io(std::io::Error::other(e)))?;
    std::fs::write(marker_path(root, &handle.owner, &handle.repo), json)?;
    Ok(())
}

/// Remove the workspace, archive and marker for one repository
pub fn cleanup(root: &Path, owner: &str, repo: &str) -> Result<bool, MaterializeError> {
    let mut removed = false;

    let dir = repo_workspace_dir(root, owner, repo);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
        removed = true;
    }
    for file in [repo_archive_path(root, owner, repo), marker_path(root, owner, repo)] {
        if file.exists() {
            std::fs::remove_file(&file)?;
            removed = true;
        }
    }

    if removed {
        tracing::info!("Removed workspace for {}/{}", owner, repo);
    }
    Ok(removed)
}

/// Remove every workspace whose marker is older than `ttl`.
/// Workspaces with no readable marker are orphans and removed as well.
pub fn cleanup_expired(root: &Path, ttl: Duration) -> Result<usize, MaterializeError> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let mut removed = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(slug) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let marker_file = root.join(format!("{slug}{MARKER_SUFFIX}"));
        let expired = match read_marker(&marker_file) {
            Some(marker) => now
                .signed_duration_since(marker.materialized_at)
                .to_std()
                .map(|age| age >= ttl)
                .unwrap_or(false),
            None => true,
        };
        if !expired {
            continue;
        }

        if let Err(e) = std::fs::remove_dir_all(&path) {
            tracing::warn!("Failed to remove expired workspace {}: {}", path.display(), e);
            continue;
        }
        let _ = std::fs::remove_file(&marker_file);
        let _ = std::fs::remove_file(root.join(format!("{slug}.zip")));
        crate::cache::global_cache().invalidate(&path);
        tracing::info!("Removed expired workspace {}", slug);
        removed += 1;
    }

    Ok(removed)
}
