//! Archive extraction
//!
//! Codeload archives wrap everything in a single `{repo}-{branch}/` directory.
//! Extraction strips that wrapper so the workspace root is the repository root.

use std::ffi::OsString;
use std::fs::File;
use std::path::{Component, Path, PathBuf};

use super::MaterializeError;

/// Extract `archive` into `dest`, replacing whatever `dest` held.
///
/// Uses the built-in zip reader first and falls back to the system `unzip`
/// for archives it cannot handle.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<(), MaterializeError> {
    let staging = staging_dir(dest);
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    std::fs::create_dir_all(&staging)?;

    let content_root = match extract_with_zip(archive, &staging) {
        Ok(root) => root,
        Err(e) => {
            tracing::warn!("Built-in extraction failed ({}), falling back to unzip", e);
            std::fs::remove_dir_all(&staging)?;
            std::fs::create_dir_all(&staging)?;
            extract_with_unzip(archive, &staging)?;
            single_subdir(&staging)?.unwrap_or_else(|| staging.clone())
        }
    };

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(&content_root, dest)?;
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }
    Ok(())
}

fn staging_dir(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("workspace"));
    name.push(".extracting");
    dest.with_file_name(name)
}

/// Extract every entry and return the directory holding the repository root
fn extract_with_zip(archive: &Path, staging: &Path) -> Result<PathBuf, MaterializeError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| MaterializeError::Extraction(format!("invalid archive: {e}")))?;

    let mut names = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| MaterializeError::Extraction(e.to_string()))?;
        // enclosed_name rejects absolute paths and `..` traversal
        if let Some(name) = entry.enclosed_name() {
            names.push(name);
        }
    }
    let wrapper = common_wrapper(&names);

    let mut extracted = 0usize;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| MaterializeError::Extraction(e.to_string()))?;
        let Some(name) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        let relative = match &wrapper {
            Some(w) => match name.strip_prefix(w) {
                Ok(rest) if !rest.as_os_str().is_empty() => rest.to_path_buf(),
                _ => continue,
            },
            None => name,
        };
        let target = staging.join(&relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)
            .map_err(|e| MaterializeError::Extraction(format!("{}: {e}", relative.display())))?;
        extracted += 1;
    }

    tracing::debug!("Extracted {} files from {}", extracted, archive.display());
    Ok(staging.to_path_buf())
}

/// The single top-level directory shared by every entry, if there is one
fn common_wrapper(names: &[PathBuf]) -> Option<PathBuf> {
    let mut wrapper: Option<&std::ffi::OsStr> = None;
    let mut saw_nested = false;
    for name in names {
        let mut components = name.components();
        let first = match components.next() {
            Some(Component::Normal(first)) => first,
            _ => return None,
        };
        match wrapper {
            None => wrapper = Some(first),
            Some(w) if w != first => return None,
            _ => {}
        }
        if components.next().is_some() {
            saw_nested = true;
        }
    }
    // A lone top-level file is content, not a wrapper
    if saw_nested {
        wrapper.map(PathBuf::from)
    } else {
        None
    }
}

fn extract_with_unzip(archive: &Path, staging: &Path) -> Result<(), MaterializeError> {
    let output = std::process::Command::new("unzip")
        .arg("-q")
        .arg("-o")
        .arg(archive)
        .arg("-d")
        .arg(staging)
        .output()
        .map_err(|e| MaterializeError::Extraction(format!("failed to run unzip: {e}")))?;
    if !output.status.success() {
        return Err(MaterializeError::Extraction(format!(
            "unzip exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}

fn single_subdir(dir: &Path) -> Result<Option<PathBuf>, MaterializeError> {
    let entries: Vec<_> = std::fs::read_dir(dir)?.flatten().collect();
    match entries.as_slice() {
        [only] if only.file_type().map(|t| t.is_dir()).unwrap_or(false) => Ok(Some(only.path())),
        _ => Ok(None),
    }
}
