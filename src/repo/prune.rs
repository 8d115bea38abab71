//! Removal of dependency and build trees from a fresh workspace

use std::path::Path;

/// Directory names that never hold first-party source worth analyzing
pub const HEAVY_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "bower_components",
    ".git",
    "dist",
    "build",
    "target",
    ".next",
    ".nuxt",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".gradle",
    ".idea",
    "coverage",
    ".cache",
    "Pods",
    "DerivedData",
];

/// Recursively delete heavy directories below `root`. Returns bytes freed.
///
/// Failures on individual directories are logged and skipped.
pub fn prune_heavy_dirs(root: &Path) -> u64 {
    let mut freed = 0;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name();
            if HEAVY_DIRS.iter().any(|h| *h == name.to_string_lossy()) {
                let size = dir_size(&path);
                match std::fs::remove_dir_all(&path) {
                    Ok(()) => {
                        tracing::debug!("Pruned {}", path.display());
                        freed += size;
                    }
                    Err(e) => tracing::warn!("Failed to prune {}: {}", path.display(), e),
                }
            } else {
                stack.push(path);
            }
        }
    }

    freed
}

/// Total size of regular files below `path`
pub fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if file_type.is_dir() {
                stack.push(entry.path());
            } else if file_type.is_file() {
                total += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
    }
    total
}
