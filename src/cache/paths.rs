//! Workspace path utilities - materialized repos live under ~/.cache/bugsweep/repos/

use std::path::{Path, PathBuf};

/// Default root for materialized repositories.
/// Uses ~/.cache/bugsweep/repos on Unix, %LOCALAPPDATA%/bugsweep/repos on Windows.
pub fn default_workspace_root() -> PathBuf {
    let base = if cfg!(windows) {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::cache_dir().unwrap_or_else(std::env::temp_dir))
    } else {
        dirs::cache_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".cache"))
                .unwrap_or_else(std::env::temp_dir)
        })
    };

    base.join("bugsweep").join("repos")
}

/// Directory a given repository is materialized into.
pub fn repo_workspace_dir(root: &Path, owner: &str, repo: &str) -> PathBuf {
    root.join(repo_slug(owner, repo))
}

/// Download target for the repository archive (sibling of the workspace dir).
pub fn repo_archive_path(root: &Path, owner: &str, repo: &str) -> PathBuf {
    root.join(format!("{}.zip", repo_slug(owner, repo)))
}

/// Filesystem-safe, deterministic, case-insensitive name for `owner/repo`.
/// GitHub names are case-insensitive, so `Foo/Bar` and `foo/bar` share a workspace.
pub fn repo_slug(owner: &str, repo: &str) -> String {
    fn clean(part: &str) -> String {
        part.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .take(64)
            .collect::<String>()
            .trim_start_matches('.')
            .to_string()
    }

    format!("{}__{}", clean(owner), clean(repo))
}

/// Ensure the workspace root exists.
pub fn ensure_workspace_root(root: &Path) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(root)?;
    Ok(root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_slug_deterministic() {
        assert_eq!(repo_slug("octo", "hello"), repo_slug("octo", "hello"));
        assert_eq!(repo_slug("Octo", "Hello"), "octo__hello");
    }

    #[test]
    fn test_repo_slug_sanitizes_traversal() {
        let slug = repo_slug("../evil", "a/b");
        assert!(!slug.contains('/'));
        assert!(!slug.starts_with('.'));
    }

    #[test]
    fn test_workspace_paths() {
        let root = Path::new("/tmp/ws");
        assert_eq!(
            repo_workspace_dir(root, "octo", "hello"),
            PathBuf::from("/tmp/ws/octo__hello")
        );
        assert_eq!(
            repo_archive_path(root, "octo", "hello"),
            PathBuf::from("/tmp/ws/octo__hello.zip")
        );
    }

    #[test]
    fn test_default_root_is_namespaced() {
        let root = default_workspace_root();
        assert!(root.ends_with("bugsweep/repos"));
    }
}
