//! Listing cache for materialized repositories
//!
//! Every page of an analysis is a separate invocation, and each one needs the
//! full selectable file list to compute its slice. Walking a large checkout on
//! every call is wasteful, so raw listings are memoised per workspace and
//! keyed by the materialization time (a re-fetch invalidates the entry).

pub mod paths;

pub use paths::{
    default_workspace_root, ensure_workspace_root, repo_archive_path, repo_slug,
    repo_workspace_dir,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::repo::RawEntry;

/// Global listing cache instance
static GLOBAL_CACHE: OnceLock<ListingCache> = OnceLock::new();

/// Get or initialize the global listing cache
pub fn global_cache() -> &'static ListingCache {
    GLOBAL_CACHE.get_or_init(ListingCache::new)
}

#[derive(Clone)]
struct CachedListing {
    materialized_at: DateTime<Utc>,
    entries: Arc<Vec<RawEntry>>,
}

/// Thread-safe listing cache
#[derive(Clone, Default)]
pub struct ListingCache {
    listings: Arc<DashMap<PathBuf, CachedListing>>,
}

impl ListingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached listing for `root` if it was taken for the same materialization
    pub fn get(&self, root: &Path, materialized_at: DateTime<Utc>) -> Option<Arc<Vec<RawEntry>>> {
        self.listings
            .get(root)
            .filter(|c| c.materialized_at == materialized_at)
            .map(|c| Arc::clone(&c.entries))
    }

    pub fn insert(
        &self,
        root: &Path,
        materialized_at: DateTime<Utc>,
        entries: Vec<RawEntry>,
    ) -> Arc<Vec<RawEntry>> {
        let entries = Arc::new(entries);
        self.listings.insert(
            root.to_path_buf(),
            CachedListing {
                materialized_at,
                entries: Arc::clone(&entries),
            },
        );
        entries
    }

    /// Drop the listing for a workspace (after cleanup or re-fetch)
    pub fn invalidate(&self, root: &Path) {
        if self.listings.remove(root).is_some() {
            tracing::debug!("Invalidated listing cache for {}", root.display());
        }
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}
