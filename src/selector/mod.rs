//! File selection and processing order
//!
//! Inclusion is decided by kind only (extension and path segments). The
//! resulting order is total and deterministic for a given listing, so page N
//! covers the same files no matter how often it is requested.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::{FileCategory, FileDescriptor};
use crate::repo::RawEntry;

/// Source extensions
const CODE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "mjs", "cjs", "ts", "tsx", "py", "java", "kt", "kts", "scala", "go", "rs", "rb",
    "php", "c", "h", "cc", "cpp", "cxx", "hpp", "hh", "cs", "swift", "m", "mm", "dart", "lua",
    "pl", "r", "ex", "exs", "erl", "hs", "clj", "vue", "svelte", "sh", "bash", "zsh", "ps1", "sql",
];

const CONFIG_EXTENSIONS: &[&str] = &[
    "json", "yaml", "yml", "toml", "ini", "cfg", "conf", "xml", "gradle", "properties", "env",
];

const DOC_EXTENSIONS: &[&str] = &["md", "mdx", "rst", "txt"];

/// The core general-purpose languages, analyzed first within a depth level
const IMPORTANT_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "py", "java"];

/// Path segments whose subtrees are never analyzed
const DENY_SEGMENTS: &[&str] = &[
    "node_modules",
    "vendor",
    "bower_components",
    "jspm_packages",
    ".git",
    ".svn",
    ".hg",
    "dist",
    "build",
    "out",
    "target",
    ".next",
    ".nuxt",
    ".output",
    "__pycache__",
    ".pytest_cache",
    ".mypy_cache",
    ".venv",
    "venv",
    ".tox",
    ".gradle",
    ".idea",
    ".vscode",
    "coverage",
    ".cache",
    "Pods",
    "DerivedData",
];

/// Lock files and generated artifacts that match an allowed extension
const DENY_FILE_NAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "composer.lock",
    "Cargo.lock",
    "Gemfile.lock",
    "poetry.lock",
];

/// True if a directory with this name is excluded wholesale
pub fn is_denied_segment(name: &str) -> bool {
    DENY_SEGMENTS.contains(&name)
}

/// Category for an extension, or None if the extension is not analyzable
pub fn categorize(extension: &str) -> Option<FileCategory> {
    let ext = extension.to_ascii_lowercase();
    let ext = ext.as_str();
    if CODE_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Code)
    } else if CONFIG_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Config)
    } else if DOC_EXTENSIONS.contains(&ext) {
        Some(FileCategory::Doc)
    } else {
        None
    }
}

fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    // ".env" is an extension; ".gitignore" style names have no stem
    if stem.is_empty() && ext != "env" {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn is_important(extension: &str) -> bool {
    IMPORTANT_EXTENSIONS.contains(&extension)
}

/// Filter, dedupe and order a raw listing
pub fn select(entries: &[RawEntry]) -> Vec<FileDescriptor> {
    let mut seen = HashSet::new();
    let mut files: Vec<FileDescriptor> = entries
        .iter()
        .filter_map(|entry| {
            let path = entry.path.trim_start_matches("./");
            if path.is_empty() || !seen.insert(path.to_string()) {
                return None;
            }
            let mut segments = path.split('/').collect::<Vec<_>>();
            let file_name = segments.pop()?;
            if segments.iter().any(|s| is_denied_segment(s)) || DENY_FILE_NAMES.contains(&file_name)
            {
                return None;
            }
            let extension = extension_of(path)?;
            let category = categorize(&extension)?;
            Some(FileDescriptor {
                path: path.to_string(),
                size: entry.size,
                extension,
                category,
            })
        })
        .collect();

    files.sort_by(compare);
    files
}

/// Depth, then important extensions, then size, then path
fn compare(a: &FileDescriptor, b: &FileDescriptor) -> Ordering {
    a.depth()
        .cmp(&b.depth())
        .then_with(|| is_important(&b.extension).cmp(&is_important(&a.extension)))
        .then_with(|| a.size.cmp(&b.size))
        .then_with(|| a.path.cmp(&b.path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, size: u64) -> RawEntry {
        RawEntry {
            path: path.to_string(),
            size,
        }
    }

    fn paths(files: &[FileDescriptor]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_filters_by_kind_and_segment() {
        let files = select(&[
            entry("src/app.ts", 10),
            entry("logo.png", 10),
            entry("node_modules/react/index.js", 10),
            entry("web/dist/bundle.js", 10),
            entry("package-lock.json", 10),
            entry("README.md", 10),
            entry("config/settings.yaml", 10),
            entry(".gitignore", 10),
        ]);
        // Important extensions lead within a depth level
        assert_eq!(paths(&files), vec!["README.md", "src/app.ts", "config/settings.yaml"]);
        assert_eq!(files[0].category, FileCategory::Doc);
        assert_eq!(files[1].category, FileCategory::Code);
        assert_eq!(files[2].category, FileCategory::Config);
    }

    #[test]
    fn test_ordering_depth_importance_size() {
        let files = select(&[
            entry("lib/deep/util.py", 1),
            entry("main.go", 5),
            entry("index.js", 500),
            entry("app.py", 100),
            entry("lib/b.rs", 1),
            entry("lib/a.ts", 9000),
        ]);
        assert_eq!(
            paths(&files),
            vec![
                "app.py",
                "index.js",
                "main.go",
                "lib/a.ts",
                "lib/b.rs",
                "lib/deep/util.py"
            ]
        );
    }

    #[test]
    fn test_deduplicates_and_is_deterministic() {
        let listing = vec![
            entry("a.py", 3),
            entry("./a.py", 3),
            entry("b.py", 3),
            entry("c.py", 3),
        ];
        let first = select(&listing);
        assert_eq!(first.len(), 3);

        let mut reversed = listing.clone();
        reversed.reverse();
        let second = select(&reversed);
        assert_eq!(paths(&first), paths(&second));
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("src/App.TSX").as_deref(), Some("tsx"));
        assert_eq!(extension_of(".env").as_deref(), Some("env"));
        assert_eq!(extension_of(".gitignore"), None);
        assert_eq!(extension_of("Makefile"), None);
    }
}
