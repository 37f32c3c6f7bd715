//! Applying a patch document to files on disk.
//!
//! Application runs in two phases. The first reads every target, checks
//! baselines and applies hunks in memory; the second writes the results.
//! Nothing is written when the first phase finds a conflict, unless partial
//! application is allowed, and nothing at all is written in dry-run mode.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::diff::{FileDiff, FileOp, Hunk};
use super::document::{PatchDocument, PatchSection};
use crate::output::writer::write_atomic;
use crate::packer::canonical::sha256_hex;
use crate::utils::error::CodecrateError;
use crate::utils::paths::{normalize_relative, safe_join};

/// How recorded baseline checksums are enforced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckBaseline {
    /// Check files that have a recorded checksum
    #[default]
    Verify,
    /// Refuse patches without baseline metadata
    Require,
    /// Skip baseline checks
    Ignore,
}

impl fmt::Display for CheckBaseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify => write!(f, "verify"),
            Self::Require => write!(f, "require"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

impl FromStr for CheckBaseline {
    type Err = CodecrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "verify" => Ok(Self::Verify),
            "require" => Ok(Self::Require),
            "ignore" => Ok(Self::Ignore),
            other => Err(CodecrateError::ValidationError {
                message: format!("Invalid baseline check mode: '{}'", other),
                suggestion: "Valid modes are: verify, require, ignore".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub check_baseline: CheckBaseline,
    pub dry_run: bool,
    pub allow_partial: bool,
}

/// What happened to one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileAction {
    Created,
    Modified,
    Deleted,
}

/// Outcome of an apply run.
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Files changed, or that would change in dry-run mode
    pub changed: Vec<(PathBuf, FileAction)>,
    /// Per-file conflicts, in patch order
    pub conflicts: Vec<CodecrateError>,
    pub dry_run: bool,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

enum Planned {
    Write(String),
    Remove,
}

struct PlannedFile {
    target: PathBuf,
    action: FileAction,
    planned: Planned,
}

/// Find `expected` in `old` at or after `floor`, nearest to `hint`.
fn locate(old: &[&str], expected: &[&str], hint: usize, floor: usize) -> Option<usize> {
    let last = old.len().checked_sub(expected.len())?;
    if floor > last {
        return None;
    }
    let hint = hint.clamp(floor, last);
    if expected.is_empty() {
        return Some(hint);
    }
    let matches = |pos: usize| old[pos..pos + expected.len()] == *expected;
    let reach = (hint - floor).max(last - hint);
    for delta in 0..=reach {
        if hint + delta <= last && matches(hint + delta) {
            return Some(hint + delta);
        }
        if delta > 0 && delta <= hint - floor && matches(hint - delta) {
            return Some(hint - delta);
        }
    }
    None
}

/// Apply hunks to `text`.
///
/// Each hunk's removed and context lines must match exactly; the recorded
/// position is tried first, then the nearest match after earlier hunks.
pub fn apply_hunks(path: &str, text: &str, hunks: &[Hunk]) -> Result<String, CodecrateError> {
    let old: Vec<&str> = text.split_inclusive('\n').collect();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for (n, hunk) in hunks.iter().enumerate() {
        let expected = hunk.old_lines();
        let pos = locate(&old, &expected, hunk.old_start, cursor).ok_or_else(|| {
            CodecrateError::HunkConflict {
                path: path.to_string(),
                hunk: format!("hunk {} ({})", n + 1, hunk.header()),
                message: "context lines not found in target".to_string(),
            }
        })?;
        if pos != hunk.old_start {
            tracing::debug!(path, hunk = n + 1, offset = pos as i64 - hunk.old_start as i64, "hunk applied at offset");
        }
        for line in &old[cursor..pos] {
            out.push_str(line);
        }
        for line in hunk.new_lines() {
            out.push_str(line);
        }
        cursor = pos + expected.len();
    }
    for line in &old[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

fn read_target(target: &Path) -> Result<Option<String>, CodecrateError> {
    match std::fs::read(target) {
        Ok(bytes) => String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| CodecrateError::Encoding {
                path: target.to_path_buf(),
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CodecrateError::FileSystem(e)),
    }
}

fn check_baseline(
    path: &str,
    diff: &FileDiff,
    current: Option<&str>,
    section: &PatchSection,
    mode: CheckBaseline,
) -> Result<(), CodecrateError> {
    if mode == CheckBaseline::Ignore {
        return Ok(());
    }
    let actual = current.map(|text| sha256_hex(text.as_bytes()));
    let recorded = section
        .meta
        .as_ref()
        .and_then(|m| m.baseline_files_sha256.get(&diff.path));

    match (diff.op, recorded) {
        (FileOp::Add, _) => match actual {
            Some(actual) => Err(CodecrateError::BaselineConflict {
                path: path.to_string(),
                expected: "absent".to_string(),
                actual,
            }),
            None => Ok(()),
        },
        (_, Some(expected)) => {
            if actual.as_deref() == Some(expected.as_str()) {
                Ok(())
            } else {
                Err(CodecrateError::BaselineConflict {
                    path: path.to_string(),
                    expected: expected.clone(),
                    actual: actual.unwrap_or_else(|| "missing".to_string()),
                })
            }
        }
        (_, None) if mode == CheckBaseline::Require => Err(CodecrateError::BaselineConflict {
            path: path.to_string(),
            expected: "recorded baseline".to_string(),
            actual: "none recorded".to_string(),
        }),
        (_, None) => Ok(()),
    }
}

fn plan_file(
    base: &Path,
    diff: &FileDiff,
    section: &PatchSection,
    mode: CheckBaseline,
) -> Result<PlannedFile, CodecrateError> {
    let path = normalize_relative(&diff.path)?;
    let target = safe_join(base, &path)?;
    let current = read_target(&target)?;
    check_baseline(&path, diff, current.as_deref(), section, mode)?;

    let missing = || CodecrateError::HunkConflict {
        path: path.clone(),
        hunk: "file".to_string(),
        message: "target file does not exist".to_string(),
    };
    let (action, planned) = match diff.op {
        FileOp::Add => {
            if current.is_some() {
                return Err(CodecrateError::HunkConflict {
                    path: path.clone(),
                    hunk: "file".to_string(),
                    message: "target file already exists".to_string(),
                });
            }
            let text = apply_hunks(&path, "", &diff.hunks)?;
            (FileAction::Created, Planned::Write(text))
        }
        FileOp::Modify => {
            let current = current.ok_or_else(missing)?;
            let text = apply_hunks(&path, &current, &diff.hunks)?;
            (FileAction::Modified, Planned::Write(text))
        }
        FileOp::Delete => {
            let current = current.ok_or_else(missing)?;
            let rest = apply_hunks(&path, &current, &diff.hunks)?;
            if !rest.is_empty() {
                return Err(CodecrateError::HunkConflict {
                    path: path.clone(),
                    hunk: "file".to_string(),
                    message: "file has content beyond the deleted lines".to_string(),
                });
            }
            (FileAction::Deleted, Planned::Remove)
        }
    };
    tracing::debug!(path = %path, hunks = diff.hunks.len(), "planned file");
    Ok(PlannedFile {
        target,
        action,
        planned,
    })
}

/// Apply a patch document under `root`.
///
/// Multi-section patches apply each section under `root/<slug>/`. Returns
/// the first conflict as an error unless `allow_partial` is set, in which
/// case conflicting files are skipped and listed in the report.
pub fn apply_patch(
    document: &PatchDocument,
    root: &Path,
    options: &ApplyOptions,
) -> Result<ApplyReport, CodecrateError> {
    if options.check_baseline == CheckBaseline::Require {
        if let Some(section) = document.sections.iter().find(|s| s.meta.is_none()) {
            return Err(CodecrateError::ValidationError {
                message: format!("Patch section '{}' has no baseline metadata", section.label),
                suggestion: "Re-generate the patch with `codecrate patch`, or use --check-baseline verify".to_string(),
            });
        }
    }

    let multi = document.is_multi_repo();
    let mut planned = Vec::new();
    let mut report = ApplyReport {
        dry_run: options.dry_run,
        ..Default::default()
    };

    for section in &document.sections {
        let base = if multi {
            safe_join(root, &section.slug)?
        } else {
            root.to_path_buf()
        };
        for diff in &section.files {
            match plan_file(&base, diff, section, options.check_baseline) {
                Ok(file) => planned.push(file),
                Err(err) => {
                    tracing::warn!("{}", err);
                    report.conflicts.push(err);
                }
            }
        }
    }

    if !report.conflicts.is_empty() && !options.allow_partial {
        return Err(report.conflicts.remove(0));
    }

    for file in planned {
        if !options.dry_run {
            match &file.planned {
                Planned::Write(text) => write_atomic(&file.target, text.as_bytes())?,
                Planned::Remove => std::fs::remove_file(&file.target)?,
            }
        }
        report.changed.push((file.target, file.action));
    }

    tracing::info!(
        changed = report.changed.len(),
        conflicts = report.conflicts.len(),
        dry_run = options.dry_run,
        "Applied patch"
    );
    Ok(report)
}
