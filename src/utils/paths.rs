//! Relative path handling for paths read from pack and patch documents.

use std::path::{Path, PathBuf};

use crate::utils::error::CodecrateError;

fn unsafe_path(path: &str, reason: &str) -> CodecrateError {
    CodecrateError::UnsafePath {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn is_windows_drive(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Normalize a document path to `a/b/c` form.
///
/// Absolute paths, drive or UNC prefixes and `..` components are refused;
/// `.` components and repeated separators are dropped.
pub fn normalize_relative(raw: &str) -> Result<String, CodecrateError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(unsafe_path(raw, "empty path"));
    }
    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(unsafe_path(raw, "absolute path"));
    }
    if is_windows_drive(&unified) {
        return Err(unsafe_path(raw, "drive-qualified path"));
    }

    let mut parts = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => continue,
            ".." => return Err(unsafe_path(raw, "path traversal")),
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path(raw, "path has no components"));
    }
    Ok(parts.join("/"))
}

/// Join a document path onto a root after normalizing it.
pub fn safe_join(root: &Path, raw: &str) -> Result<PathBuf, CodecrateError> {
    let normalized = normalize_relative(raw)?;
    let mut target = root.to_path_buf();
    for part in normalized.split('/') {
        target.push(part);
    }
    Ok(target)
}
