//! Shallow clone acquisition through the `git` binary

use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

use super::MaterializeError;

const CLONE_TIMEOUT: Duration = Duration::from_secs(600);

/// Shallow, blobless, single-branch clone of `url` into `dest`.
/// Returns the checked-out HEAD commit, if it can be read.
pub async fn shallow_clone(
    url: &str,
    branch: &str,
    dest: &Path,
) -> Result<Option<String>, MaterializeError> {
    if dest.exists() {
        tokio::fs::remove_dir_all(dest).await?;
    }

    let mut cmd = Command::new("git");
    cmd.arg("clone")
        .arg("--depth=1")
        .arg("--filter=blob:none")
        .arg("--single-branch")
        .arg("--branch")
        .arg(branch)
        .arg(url)
        .arg(dest)
        .env("GIT_TERMINAL_PROMPT", "0")
        .kill_on_drop(true);

    let output = tokio::time::timeout(CLONE_TIMEOUT, cmd.output())
        .await
        .map_err(|_| MaterializeError::Clone(format!("timed out after {}s", CLONE_TIMEOUT.as_secs())))?
        .map_err(|e| MaterializeError::Clone(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MaterializeError::Clone(stderr.trim().to_string()));
    }

    Ok(head_revision(dest))
}

/// HEAD commit id of the repository containing `path`
pub fn head_revision(path: &Path) -> Option<String> {
    let repo = git2::Repository::discover(path).ok()?;
    let head = repo.head().ok()?;
    head.peel_to_commit().ok().map(|c| c.id().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_head_revision_of_plain_dir_is_none() {
        let dir = tempdir().unwrap();
        assert!(head_revision(dir.path()).is_none());
    }

    #[test]
    fn test_head_revision_reads_commit() {
        let dir = tempdir().unwrap();
        let repo = git2::Repository::init(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("a.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("Test", "test@example.com").unwrap();
        let commit = repo
            .commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        assert_eq!(head_revision(dir.path()), Some(commit.to_string()));
    }
}
