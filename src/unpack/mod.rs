//! Reconstruction of original files from a pack document.

use std::path::{Path, PathBuf};

use crate::output::reader::{PackDocument, PackSection};
use crate::output::writer::write_atomic;
use crate::packer::Layout;
use crate::packer::canonical::sha256_hex;
use crate::packer::stub::expand_markers;
use crate::utils::error::CodecrateError;
use crate::utils::paths::{normalize_relative, safe_join};

/// One rebuilt file.
#[derive(Debug, Clone)]
pub struct ReconstructedFile {
    pub path: String,
    pub text: String,
    /// Marker ids left unresolved (non-strict mode only)
    pub unresolved: Vec<String>,
    /// Whether the rebuilt bytes match `sha256_original`
    pub checksum_ok: bool,
}

/// All files of one section, in manifest order.
#[derive(Debug, Clone)]
pub struct ReconstructedSection {
    pub label: String,
    pub slug: String,
    pub files: Vec<ReconstructedFile>,
}

impl ReconstructedSection {
    pub fn file(&self, path: &str) -> Option<&ReconstructedFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn unresolved_count(&self) -> usize {
        self.files.iter().map(|f| f.unresolved.len()).sum()
    }
}

/// Rebuild every file of a section.
///
/// A checksum mismatch is an `IntegrityMismatch` error, except for files
/// whose mismatch is explained by unresolved markers in non-strict mode,
/// which are returned with `checksum_ok == false`.
pub fn reconstruct_section(
    section: &PackSection,
    strict: bool,
) -> Result<ReconstructedSection, CodecrateError> {
    let manifest = section.require_manifest()?;
    let mut files = Vec::with_capacity(manifest.files.len());

    for entry in &manifest.files {
        let path = normalize_relative(&entry.path)?;
        let block = section
            .file_block(&entry.path)
            .ok_or_else(|| CodecrateError::ValidationError {
                message: format!("Missing file block for {}", entry.path),
                suggestion: "Re-generate the pack; the document appears truncated".to_string(),
            })?;

        let mut stored = block.to_string();
        if entry.no_trailing_newline && stored.ends_with('\n') {
            stored.pop();
        }

        let stubbed = manifest.layout == Layout::Stubs || entry.sha256_stubbed.is_some();
        let (text, unresolved) = if stubbed {
            let expansion = expand_markers(&path, &stored, &section.library, strict)?;
            (expansion.text, expansion.unresolved)
        } else {
            (stored, Vec::new())
        };

        let actual = sha256_hex(text.as_bytes());
        let checksum_ok = actual == entry.sha256_original;
        if !checksum_ok {
            if unresolved.is_empty() || strict {
                return Err(CodecrateError::IntegrityMismatch {
                    path,
                    expected: entry.sha256_original.clone(),
                    actual,
                });
            }
            tracing::warn!(
                path = %path,
                unresolved = unresolved.len(),
                "checksum not verified because markers are unresolved"
            );
        }

        files.push(ReconstructedFile {
            path,
            text,
            unresolved,
            checksum_ok,
        });
    }

    tracing::debug!(
        section = %section.label,
        files = files.len(),
        "reconstructed section"
    );
    Ok(ReconstructedSection {
        label: section.label.clone(),
        slug: section.slug.clone(),
        files,
    })
}

/// Rebuild all sections of a document.
pub fn reconstruct(
    document: &PackDocument,
    strict: bool,
) -> Result<Vec<ReconstructedSection>, CodecrateError> {
    document
        .sections
        .iter()
        .map(|section| reconstruct_section(section, strict))
        .collect()
}

/// Summary of an unpack run.
#[derive(Debug, Clone, Default)]
pub struct UnpackReport {
    pub written: Vec<PathBuf>,
    pub unresolved_markers: usize,
}

/// Rebuild a document and write its files under `out_dir`.
///
/// Multi-section documents write each section under `out_dir/<slug>/`.
/// Nothing is written unless every section reconstructs.
pub fn unpack_to_dir(
    document: &PackDocument,
    out_dir: &Path,
    strict: bool,
) -> Result<UnpackReport, CodecrateError> {
    let sections = reconstruct(document, strict)?;
    let multi = document.is_multi_repo();
    let mut report = UnpackReport::default();

    for section in &sections {
        let base = if multi {
            safe_join(out_dir, &section.slug)?
        } else {
            out_dir.to_path_buf()
        };
        for file in &section.files {
            let target = safe_join(&base, &file.path)?;
            write_atomic(&target, file.text.as_bytes())?;
            tracing::debug!(path = %target.display(), "wrote file");
            report.written.push(target);
        }
        report.unresolved_markers += section.unresolved_count();
    }

    tracing::info!(
        files = report.written.len(),
        out = %out_dir.display(),
        "Unpacked"
    );
    Ok(report)
}
