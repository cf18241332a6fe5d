use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::DsmConfig;

/// Directory names that always hold third-party code.
pub const THIRD_PARTY_DIRS: &[&str] = &["site-packages", "dist-packages", "__pycache__"];

/// Source file extensions the scanner understands.
const SOURCE_EXTENSIONS: &[&str] = &["py", "pyi"];

/// Walk the analyzed root and collect Python source files, sorted by path.
///
/// Respects `.gitignore` rules, always skips third-party directories, and applies any additional
/// exclusions from `config.exclude`.
pub fn walk_source_files(root: &Path, config: &DsmConfig) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .standard_filters(true)
        // Read .gitignore files even when the directory is not inside a git repository.
        .require_git(false)
        .build();

    for result in walker {
        let entry = match result {
            Ok(e) => e,
            Err(err) => {
                warn!("{err}");
                continue;
            }
        };

        let path = entry.path();
        if entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
            continue;
        }
        if path_in_third_party_dir(path) {
            continue;
        }
        let relative = path.strip_prefix(root).unwrap_or(path);
        if is_excluded_by_config(relative, config) {
            continue;
        }

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        if !SOURCE_EXTENSIONS.contains(&ext) {
            continue;
        }

        debug!("source file {}", path.display());
        files.push(path.to_path_buf());
    }

    files.sort();
    files
}

/// Collect raw extractor documents (`*.json`) under `dir`, sorted by path.
///
/// Hidden files and ignore rules are not applied: every document the extractor wrote counts.
pub fn walk_raw_documents(dir: &Path) -> Vec<PathBuf> {
    let walker = ignore::WalkBuilder::new(dir)
        .standard_filters(false)
        .build();

    let mut files: Vec<PathBuf> = walker
        .filter_map(|r| match r {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("{err}");
                None
            }
        })
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();
    files
}

/// Returns true if any component of `path` is a well-known third-party directory.
pub fn path_in_third_party_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| THIRD_PARTY_DIRS.contains(&s))
            .unwrap_or(false)
    })
}

/// Returns true if `path` matches any exclusion pattern from config.
///
/// A pattern matches either the whole (root-relative) path or any single component.
pub fn is_excluded_by_config(path: &Path, config: &DsmConfig) -> bool {
    match &config.exclude {
        Some(patterns) => matches_any_pattern(path, patterns),
        None => false,
    }
}

/// Returns true if `path` or one of its components matches a glob in `patterns`.
pub fn matches_any_pattern(path: &Path, patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy().replace('\\', "/");

    for pattern in patterns {
        let Ok(matcher) = glob::Pattern::new(pattern) else {
            continue;
        };
        if matcher.matches(&path_str) {
            return true;
        }
        for component in path.components() {
            if let Some(s) = component.as_os_str().to_str()
                && matcher.matches(s)
            {
                return true;
            }
        }
    }

    false
}
