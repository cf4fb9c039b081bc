//! Output directory inspection and report source expansion.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// List the regular files the coverage tool left under `dir`, sorted.
///
/// Returns an empty list when the directory does not exist.
pub fn collect_report_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Expand report source patterns the way a shell expands `pkg/*.py`.
///
/// Matches are made relative to `working_dir`. A pattern that matches nothing,
/// or is not a valid glob, is passed through unchanged.
pub fn expand_sources(patterns: &[String], working_dir: &Path) -> Vec<OsString> {
    let base = glob::Pattern::escape(&working_dir.to_string_lossy());
    let mut expanded = Vec::new();

    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), pattern)
        };

        let mut matches: Vec<PathBuf> = match glob::glob(&full) {
            Ok(paths) => paths
                .filter_map(|p| p.ok())
                .map(|p| p.strip_prefix(working_dir).map(Path::to_path_buf).unwrap_or(p))
                .collect(),
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "Invalid source pattern, passing it through");
                Vec::new()
            }
        };

        if matches.is_empty() {
            expanded.push(OsString::from(pattern));
            continue;
        }

        matches.sort();
        matches.dedup();
        expanded.extend(matches.into_iter().map(PathBuf::into_os_string));
    }

    expanded
}
