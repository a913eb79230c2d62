//! Pattern based file selection and copying

use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Pattern selecting the whole source directory
pub const WHOLE_DIRECTORY: &str = "/";

/// Find entries under `source` whose relative path matches any pattern
///
/// Patterns are regular expressions searched in the slash separated
/// relative path. Returned paths are relative to `source`; an empty path
/// stands for the whole directory. Entries inside an already selected
/// directory are not listed separately.
pub fn filter_paths(source: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    if patterns.iter().any(|p| p == WHOLE_DIRECTORY) {
        return Ok(vec![PathBuf::new()]);
    }

    let regexes = patterns
        .iter()
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).wrap_err(ErrorKind::Specification, || format!("Invalid file pattern '{}'.", p))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut found: Vec<PathBuf> = Vec::new();
    let walker = WalkDir::new(source).min_depth(1).sort_by_file_name();
    for entry in walker {
        let entry = entry.wrap_err(ErrorKind::General, || {
            format!("Failed to walk '{}'.", source.display())
        })?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        if found.iter().any(|dir| relative.starts_with(dir)) {
            continue;
        }
        let text = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        if regexes.iter().any(|re| re.is_match(&text)) {
            found.push(relative);
        }
    }

    Ok(found)
}

/// Copy entries matching `patterns` from `source` into `target`
///
/// Directories are merged into the target; files are copied only when the
/// target does not contain them yet. Returns the copied relative paths.
/// Fails with a library error when nothing matches.
pub fn fetch_files(source: &Path, patterns: &[String], target: &Path) -> Result<Vec<PathBuf>> {
    debug!(
        source = %source.display(),
        patterns = %patterns.join(", "),
        "Searching for library files"
    );
    let found = filter_paths(source, patterns)?;
    if found.is_empty() {
        return Err(Error::library(format!(
            "No files matching '{}' found in '{}'.",
            patterns.join("', '"),
            source.display()
        )));
    }

    for relative in &found {
        let from = source.join(relative);
        let to = target.join(relative);
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            copy_file(&from, &to)?;
        }
    }

    debug!(count = found.len(), target = %target.display(), "Library files copied");
    Ok(found)
}

/// Recursively merge `from` into `to` without overwriting files
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.wrap_err(ErrorKind::General, || format!("Failed to walk '{}'.", from.display()))?;
        let relative = match entry.path().strip_prefix(from) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let destination = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination).wrap_err(ErrorKind::General, || {
                format!("Failed to create '{}'.", destination.display())
            })?;
        } else {
            copy_file(entry.path(), &destination)?;
        }
    }
    Ok(())
}

/// Copy a single file unless the destination already exists
fn copy_file(from: &Path, to: &Path) -> Result<()> {
    if to.exists() {
        return Ok(());
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err(ErrorKind::General, || format!("Failed to create '{}'.", parent.display()))?;
    }
    std::fs::copy(from, to).wrap_err(ErrorKind::General, || {
        format!("Failed to copy '{}' to '{}'.", from.display(), to.display())
    })?;
    Ok(())
}
