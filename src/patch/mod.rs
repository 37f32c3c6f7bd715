//! Patch generation and application.
//!
//! A patch is computed from a baseline pack, always through its
//! reconstructed files, against the current files on disk. Each section
//! records the baseline checksums of the files it touches so that `apply`
//! can refuse to patch files that moved on since.

pub mod apply;
pub mod diff;
pub mod document;

use std::collections::{BTreeMap, BTreeSet};

use crate::output::manifest::canonical_sha256;
use crate::output::reader::{PackDocument, PackSection};
use crate::packer::FileInput;
use crate::packer::canonical::sha256_hex;
use crate::unpack::{ReconstructedSection, reconstruct_section};
use crate::utils::error::CodecrateError;
use diff::{FileDiff, FileOp};
use document::{PatchDocument, PatchMeta, PatchSection};

pub use apply::{ApplyOptions, ApplyReport, CheckBaseline, apply_patch};
pub use document::{parse_patch, render_patch};

fn baseline_manifest_sha256(section: &PackSection) -> Result<Option<String>, CodecrateError> {
    match &section.manifest_value {
        Some(value) => Ok(Some(canonical_sha256(value)?)),
        None => Ok(None),
    }
}

/// Diff one reconstructed baseline section against current files.
///
/// Files are visited in path order; unchanged files produce nothing.
pub fn diff_section(
    baseline: &ReconstructedSection,
    manifest_sha256: Option<String>,
    current: &[FileInput],
) -> PatchSection {
    let before: BTreeMap<&str, &str> = baseline
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.text.as_str()))
        .collect();
    let after: BTreeMap<&str, &str> = current
        .iter()
        .map(|f| (f.path.as_str(), f.text.as_str()))
        .collect();
    let paths: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    let mut meta = PatchMeta::new(Some(baseline.label.clone()), manifest_sha256);
    let mut files = Vec::new();
    for path in paths {
        let old = before.get(path).copied();
        let new = after.get(path).copied();
        let Some(file_diff) = FileDiff::between(path, old, new) else {
            continue;
        };
        if file_diff.op != FileOp::Add {
            if let Some(file) = baseline.file(path) {
                meta.baseline_files_sha256.insert(
                    path.to_string(),
                    sha256_hex(file.text.as_bytes()),
                );
            }
        }
        tracing::debug!(path, hunks = file_diff.hunks.len(), "file changed");
        files.push(file_diff);
    }

    PatchSection {
        label: baseline.label.clone(),
        slug: baseline.slug.clone(),
        meta: Some(meta),
        files,
    }
}

/// Build a patch from a baseline pack to the current file sets.
///
/// `current` holds one file set per baseline section, in section order.
/// The baseline is reconstructed strictly; a baseline that does not rebuild
/// exactly cannot anchor a patch.
pub fn generate_patch(
    baseline: &PackDocument,
    current: &[Vec<FileInput>],
) -> Result<PatchDocument, CodecrateError> {
    if current.len() != baseline.sections.len() {
        return Err(CodecrateError::ValidationError {
            message: format!(
                "Baseline has {} section(s) but {} current file set(s) were given",
                baseline.sections.len(),
                current.len()
            ),
            suggestion: "Pass one repository root per baseline section".to_string(),
        });
    }

    let mut sections = Vec::with_capacity(current.len());
    for (section, files) in baseline.sections.iter().zip(current) {
        let rebuilt = reconstruct_section(section, true)?;
        let patch_section = diff_section(&rebuilt, baseline_manifest_sha256(section)?, files);
        tracing::info!(
            section = %section.label,
            changed = patch_section.files.len(),
            "Computed patch section"
        );
        sections.push(patch_section);
    }
    Ok(PatchDocument { sections })
}
