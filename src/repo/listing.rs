//! Raw file listing and content access for a materialized repository

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

use crate::selector::is_denied_segment;

/// A file found on disk, before selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Forward-slash separated path relative to the repository root
    pub path: String,
    pub size: u64,
}

/// Walk `root` and list every regular file, skipping deny-listed directories.
///
/// `.gitignore` is deliberately not honoured: archives ship whatever the
/// repository tracks, and the selector decides by kind.
pub fn list_files(root: &Path) -> std::io::Result<Vec<RawEntry>> {
    let mut files = Vec::new();

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            !(is_dir && entry.depth() > 0 && is_denied_segment(&entry.file_name().to_string_lossy()))
        })
        .build();

    for entry in walker.flatten() {
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let path = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        files.push(RawEntry { path, size });
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Text content of one file, possibly truncated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub text: String,
    pub truncated: bool,
}

/// Read `relative` under `root` as text.
///
/// Returns `Ok(None)` for binary files (NUL byte in the first 8 KiB).
/// Content beyond `max_bytes` is cut at the last full line.
pub fn read_file(root: &Path, relative: &str, max_bytes: usize) -> std::io::Result<Option<FileContent>> {
    if relative.split('/').any(|part| part == "..") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("path escapes repository root: {relative}"),
        ));
    }

    let file = std::fs::File::open(root.join(relative))?;
    let mut bytes = Vec::new();
    file.take(max_bytes as u64 + 1).read_to_end(&mut bytes)?;

    let sniff = &bytes[..bytes.len().min(8192)];
    if sniff.contains(&0) {
        return Ok(None);
    }

    let truncated = bytes.len() > max_bytes;
    if truncated {
        bytes.truncate(max_bytes);
        if let Some(last_newline) = bytes.iter().rposition(|b| *b == b'\n') {
            bytes.truncate(last_newline + 1);
        }
    }

    Ok(Some(FileContent {
        text: String::from_utf8_lossy(&bytes).into_owned(),
        truncated,
    }))
}
