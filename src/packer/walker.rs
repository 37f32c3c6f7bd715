use crate::utils::error::CodecrateError;
use globset::{GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::FileInput;
use super::gitignore::DefaultIgnores;

/// Name of the tool-specific ignore file, always honored.
pub const CODECRATE_IGNORE: &str = ".codecrateignore";

/// How undecodable bytes are handled when reading sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingPolicy {
    /// Substitute U+FFFD for invalid sequences
    #[default]
    Replace,
    /// Fail on the first invalid file
    Strict,
}

impl std::str::FromStr for EncodingPolicy {
    type Err = CodecrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "strict" => Ok(Self::Strict),
            other => Err(CodecrateError::invalid_encoding_policy(other)),
        }
    }
}

/// Decode file bytes according to the policy.
pub fn decode(path: &Path, bytes: Vec<u8>, policy: EncodingPolicy) -> Result<String, CodecrateError> {
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => match policy {
            EncodingPolicy::Strict => Err(CodecrateError::Encoding {
                path: path.to_path_buf(),
            }),
            EncodingPolicy::Replace => {
                tracing::warn!(path = %path.display(), "invalid UTF-8 replaced");
                Ok(String::from_utf8_lossy(e.as_bytes()).into_owned())
            }
        },
    }
}

/// Which files under a root belong in a pack.
#[derive(Debug, Clone)]
pub struct FileSelection {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub respect_gitignore: bool,
    pub encoding: EncodingPolicy,
}

impl Default for FileSelection {
    fn default() -> Self {
        Self {
            include: vec!["**/*.py".to_string()],
            exclude: Vec::new(),
            respect_gitignore: true,
            encoding: EncodingPolicy::Replace,
        }
    }
}

/// Build a GlobSet from a list of patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet, CodecrateError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = globset::Glob::new(pattern).map_err(|e| {
            CodecrateError::Config(format!("Invalid glob pattern '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| CodecrateError::Config(format!("Failed to build glob set: {}", e)))
}

/// Normalize a path to a forward-slash separated string.
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// List the files under `root` that match the selection, as sorted relative
/// paths.
pub fn discover(root: &Path, selection: &FileSelection) -> Result<Vec<PathBuf>, CodecrateError> {
    let include_set = build_globset(&selection.include)?;
    let exclude_set = build_globset(&selection.exclude)?;
    let defaults = DefaultIgnores::new(root)?;

    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(selection.respect_gitignore)
        .git_exclude(selection.respect_gitignore)
        .git_global(false)
        .require_git(false)
        .add_custom_ignore_filename(CODECRATE_IGNORE)
        .follow_links(false)
        .max_depth(None)
        .build();

    let mut entries = Vec::new();

    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Error walking directory: {}", e);
                continue;
            }
        };

        // Skip directories
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        if entry.path_is_symlink() {
            tracing::debug!("Skipping symlink: {}", path.display());
            continue;
        }

        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        if defaults.is_ignored(path, false) {
            continue;
        }

        let normalized = normalize_path(relative);
        if !selection.include.is_empty() && !include_set.is_match(&normalized) {
            continue;
        }
        if exclude_set.is_match(&normalized) {
            continue;
        }

        entries.push(relative.to_path_buf());
    }

    entries.sort();
    tracing::info!(root = %root.display(), files = entries.len(), "scanned files");
    Ok(entries)
}

/// Discover and read every selected file.
///
/// Returns `(path, text)` pairs ordered by normalized path.
pub async fn scan_files(
    root: &Path,
    selection: &FileSelection,
) -> Result<Vec<FileInput>, CodecrateError> {
    let mut inputs = Vec::new();

    for relative in discover(root, selection)? {
        let absolute = root.join(&relative);
        let bytes = match tokio::fs::read(&absolute).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!("Permission denied: {}", absolute.display());
                continue;
            }
            Err(e) => {
                return Err(CodecrateError::FileSystem(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read {}: {}", absolute.display(), e),
                )));
            }
        };
        let text = decode(&absolute, bytes, selection.encoding)?;
        inputs.push(FileInput {
            path: normalize_path(&relative),
            text,
        });
    }

    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(inputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn test_discover_applies_include_exclude_and_defaults() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, "pkg/a.py", "a = 1\n");
        write(root, "pkg/b.py", "b = 1\n");
        write(root, "pkg/__pycache__/a.py", "stale\n");
        write(root, "README.md", "# readme\n");
        write(root, "tests/test_a.py", "def test(): pass\n");

        let selection = FileSelection {
            exclude: vec!["tests/**".to_string()],
            ..Default::default()
        };
        let files = discover(root, &selection).unwrap();
        let names: Vec<String> = files.iter().map(|p| normalize_path(p)).collect();
        assert_eq!(names, vec!["pkg/a.py", "pkg/b.py"]);
    }

    #[test]
    fn test_discover_honors_gitignore_toggle() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, ".gitignore", "generated.py\n");
        write(root, "generated.py", "x = 1\n");
        write(root, "kept.py", "y = 1\n");

        let with = discover(root, &FileSelection::default()).unwrap();
        assert_eq!(with, vec![PathBuf::from("kept.py")]);

        let selection = FileSelection {
            respect_gitignore: false,
            ..Default::default()
        };
        let without = discover(root, &selection).unwrap();
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn test_codecrateignore_is_always_honored() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        write(root, CODECRATE_IGNORE, "secret.py\n");
        write(root, "secret.py", "k = 1\n");
        write(root, "open.py", "o = 1\n");

        let selection = FileSelection {
            respect_gitignore: false,
            ..Default::default()
        };
        let files = discover(root, &selection).unwrap();
        assert_eq!(files, vec![PathBuf::from("open.py")]);
    }

    #[test]
    fn test_decode_policies() {
        let bad = vec![b'a', 0xff, b'b'];
        let replaced = decode(Path::new("x.py"), bad.clone(), EncodingPolicy::Replace).unwrap();
        assert_eq!(replaced, "a\u{fffd}b");
        let err = decode(Path::new("x.py"), bad, EncodingPolicy::Strict).unwrap_err();
        assert!(matches!(err, CodecrateError::Encoding { .. }));
    }

    #[tokio::test]
    async fn test_scan_files_reads_sorted_inputs() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "z.py", "z = 1\n");
        write(temp.path(), "a/b.py", "b = 1\n");
        let inputs = scan_files(temp.path(), &FileSelection::default())
            .await
            .unwrap();
        let paths: Vec<&str> = inputs.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a/b.py", "z.py"]);
        assert_eq!(inputs[1].text, "z = 1\n");
    }
}
