//! Input-set discovery for batch runs.

use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::ConfigError;

/// Collects candidate input files under `root`.
///
/// With `recursive` false, only the top level is scanned. `extensions`
/// filters case-insensitively (without the leading dot); an empty slice
/// accepts every regular file. Results are sorted so the scan order, and
/// with it session record order, is deterministic across runs.
pub fn scan_files(
    root: &Path,
    recursive: bool,
    extensions: &[String],
) -> Result<Vec<PathBuf>, ConfigError> {
    if !root.is_dir() {
        return Err(ConfigError::InputPathMissing(root.to_path_buf()));
    }

    let lowered: Vec<String> = extensions.iter().map(|e| e.to_ascii_lowercase()).collect();

    let mut walker = WalkDir::new(root).min_depth(1);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        if !lowered.is_empty() {
            let ext = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase());
            match ext {
                Some(ext) if lowered.contains(&ext) => {}
                _ => continue,
            }
        }

        debug!("Found input: {}", path.display());
        files.push(path.to_path_buf());
    }

    files.sort();
    info!("Scanned {} files in {}", files.len(), root.display());
    Ok(files)
}
