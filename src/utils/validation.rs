// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

//! Pack document validation.
//!
//! Each repository section is checked independently and findings are
//! grouped by section label. Checks never stop at the first failure, so a
//! single run reports everything wrong with a pack.
//!
//! # Validation Layers
//!
//! 1. **Schema**: format tags, block counts, checksum shapes, path sets
//! 2. **Integrity**: stub and original checksums of every rebuilt file
//! 3. **Markers**: marker resolution, orphaned library entries, collisions
//! 4. **Disk**: optional comparison with files under a root directory

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::output::manifest::{canonical_sha256, is_sha256_hex};
use crate::output::reader::{PackDocument, PackSection};
use crate::output::{ID_FORMAT_VERSION, MISSING_MANIFEST_HINT, PACK_FORMAT_VERSION};
use crate::packer::Layout;
use crate::packer::canonical::sha256_hex;
use crate::packer::stub::{MARKER_FORMAT_VERSION, expand_markers, find_markers};
use crate::packer::walker::{EncodingPolicy, decode};
use crate::utils::paths::{normalize_relative, safe_join};

/// Identifies which validation layer produced an error or warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationLayer {
    Schema,
    Integrity,
    Markers,
    Disk,
}

impl fmt::Display for ValidationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema => write!(f, "Schema"),
            Self::Integrity => write!(f, "Integrity"),
            Self::Markers => write!(f, "Markers"),
            Self::Disk => write!(f, "Disk"),
        }
    }
}

/// A single finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Which validation layer produced this issue
    pub layer: ValidationLayer,
    /// Human-readable description
    pub message: String,
    /// File path the issue concerns, if any
    pub location: Option<String>,
    /// Optional suggestion for fixing the issue
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    fn new(layer: ValidationLayer, message: impl Into<String>) -> Self {
        Self {
            layer,
            message: message.into(),
            location: None,
            suggestion: None,
        }
    }

    fn at(mut self, path: &str) -> Self {
        self.location = Some(path.to_string());
        self
    }

    fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.layer, self.message)?;
        if let Some(ref loc) = self.location {
            write!(f, " ({})", loc)?;
        }
        if let Some(ref sug) = self.suggestion {
            write!(f, "\n      Suggestion: {}", sug)?;
        }
        Ok(())
    }
}

/// Findings for one repository section.
#[derive(Debug, Clone, Default)]
pub struct SectionReport {
    pub label: String,
    pub slug: String,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl SectionReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Findings for a whole document.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Problems that belong to no single section
    pub errors: Vec<ValidationIssue>,
    pub sections: Vec<SectionReport>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.errors.is_empty() && self.sections.iter().all(SectionReport::passed)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.sections.iter().map(|s| s.errors.len()).sum::<usize>()
    }

    pub fn warning_count(&self) -> usize {
        self.sections.iter().map(|s| s.warnings.len()).sum()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    /// Treat unresolved and missing markers as errors
    pub strict: bool,
    /// Compare rebuilt files with this directory
    pub root: Option<PathBuf>,
    /// Decoding policy for on-disk files
    pub encoding: EncodingPolicy,
}

struct Collector<'a> {
    report: &'a mut SectionReport,
    strict: bool,
}

impl Collector<'_> {
    fn error(&mut self, issue: ValidationIssue) {
        self.report.errors.push(issue);
    }

    fn warn(&mut self, issue: ValidationIssue) {
        self.report.warnings.push(issue);
    }

    /// Error in strict mode, warning otherwise.
    fn policy(&mut self, issue: ValidationIssue) {
        if self.strict {
            self.error(issue);
        } else {
            self.warn(issue);
        }
    }
}

fn check_schema(section: &PackSection, out: &mut Collector<'_>) {
    use ValidationLayer::Schema;

    if section.manifest_blocks != 1 {
        out.error(ValidationIssue::new(
            Schema,
            format!(
                "expected exactly one codecrate-manifest block, found {}",
                section.manifest_blocks
            ),
        ));
    }
    if section.machine_header_blocks != 1 {
        out.error(ValidationIssue::new(
            Schema,
            format!(
                "expected exactly one codecrate-machine-header block, found {}",
                section.machine_header_blocks
            ),
        ));
    }

    let Some(manifest) = &section.manifest else {
        return;
    };
    if manifest.format != PACK_FORMAT_VERSION {
        out.error(ValidationIssue::new(
            Schema,
            format!("Unsupported manifest format: '{}'", manifest.format),
        ));
    }
    if manifest.id_format_version != ID_FORMAT_VERSION {
        out.error(ValidationIssue::new(
            Schema,
            format!(
                "Unsupported id_format_version: '{}' (expected {})",
                manifest.id_format_version, ID_FORMAT_VERSION
            ),
        ));
    }
    if manifest.marker_format_version != MARKER_FORMAT_VERSION {
        out.error(ValidationIssue::new(
            Schema,
            format!(
                "Unsupported marker_format_version: '{}' (expected {})",
                manifest.marker_format_version, MARKER_FORMAT_VERSION
            ),
        ));
    }

    if let (Some(header), Some(value)) = (&section.machine_header, &section.manifest_value) {
        if header.format != manifest.format {
            out.error(ValidationIssue::new(
                Schema,
                format!(
                    "Machine header format mismatch: expected {}, got {}",
                    manifest.format, header.format
                ),
            ));
        }
        match canonical_sha256(value) {
            Ok(expected) if expected != header.manifest_sha256 => {
                out.error(
                    ValidationIssue::new(
                        Schema,
                        format!(
                            "Machine header checksum mismatch: expected {}, got {}",
                            expected, header.manifest_sha256
                        ),
                    )
                    .suggest("The manifest was edited after packing; re-run `codecrate pack`"),
                );
            }
            Ok(_) => {}
            Err(err) => out.error(ValidationIssue::new(Schema, err.to_string())),
        }
    }

    for file in &manifest.files {
        if let Err(err) = normalize_relative(&file.path) {
            out.error(ValidationIssue::new(Schema, err.to_string()).at(&file.path));
        }
        if !is_sha256_hex(&file.sha256_original) {
            out.error(ValidationIssue::new(Schema, "invalid 'sha256_original'").at(&file.path));
        }
        if let Some(stubbed) = &file.sha256_stubbed {
            if !is_sha256_hex(stubbed) {
                out.error(ValidationIssue::new(Schema, "invalid 'sha256_stubbed'").at(&file.path));
            }
        } else if manifest.layout == Layout::Stubs {
            out.error(
                ValidationIssue::new(Schema, "missing 'sha256_stubbed' for stub layout").at(&file.path),
            );
        }
    }

    for path in &section.duplicate_files {
        out.error(ValidationIssue::new(Schema, "Duplicate file block").at(path));
    }
    for id in &section.duplicate_library_ids {
        out.error(ValidationIssue::new(
            Schema,
            format!("Duplicate function-library entry: id={}", id),
        ));
    }

    let manifest_paths: BTreeSet<&str> = manifest.files.iter().map(|f| f.path.as_str()).collect();
    let block_paths: BTreeSet<&str> = section.files.iter().map(|(p, _)| p.as_str()).collect();
    for path in manifest_paths.difference(&block_paths) {
        out.error(ValidationIssue::new(Schema, "Manifest file missing from file blocks").at(path));
    }
    for path in block_paths.difference(&manifest_paths) {
        out.error(ValidationIssue::new(Schema, "File block not present in manifest").at(path));
    }
}

/// Check every file entry and return marker id -> files using it.
fn check_files(
    section: &PackSection,
    root: Option<&Path>,
    encoding: EncodingPolicy,
    out: &mut Collector<'_>,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut marker_owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let Some(manifest) = &section.manifest else {
        return marker_owners;
    };

    for entry in &manifest.files {
        let path = entry.path.as_str();
        let Some(block) = section.file_block(path) else {
            continue;
        };
        let mut stored = block.to_string();
        if entry.no_trailing_newline && stored.ends_with('\n') {
            stored.pop();
        }

        if let Some(expected) = &entry.sha256_stubbed {
            let actual = sha256_hex(stored.as_bytes());
            if &actual != expected {
                out.error(
                    ValidationIssue::new(
                        ValidationLayer::Integrity,
                        format!("Stub sha mismatch: expected {}, got {}", expected, actual),
                    )
                    .at(path),
                );
            }
        }

        let stubbed = manifest.layout == Layout::Stubs || entry.sha256_stubbed.is_some();
        let rebuilt = if stubbed {
            let markers = find_markers(&stored);
            let mut seen = BTreeSet::new();
            for marker in &markers {
                if marker.version != MARKER_FORMAT_VERSION {
                    out.error(
                        ValidationIssue::new(
                            ValidationLayer::Markers,
                            format!("Unsupported marker version {} for id={}", marker.version, marker.id),
                        )
                        .at(path),
                    );
                }
                if !seen.insert(marker.id.clone()) {
                    out.warn(
                        ValidationIssue::new(
                            ValidationLayer::Markers,
                            format!("Marker collision: id={} appears more than once", marker.id),
                        )
                        .at(path),
                    );
                }
                marker_owners
                    .entry(marker.id.clone())
                    .or_default()
                    .insert(path.to_string());
            }

            for def in entry.defs.iter().filter(|d| d.has_marker) {
                if !seen.contains(&def.id) {
                    out.policy(
                        ValidationIssue::new(
                            ValidationLayer::Markers,
                            format!("Missing FUNC marker for {} (id={})", def.qualname, def.id),
                        )
                        .at(path),
                    );
                }
            }

            match expand_markers(path, &stored, &section.library, false) {
                Ok(expansion) => {
                    for id in &expansion.unresolved {
                        out.policy(
                            ValidationIssue::new(
                                ValidationLayer::Markers,
                                format!("Unresolved marker: missing canonical source for id={}", id),
                            )
                            .at(path),
                        );
                    }
                    expansion.text
                }
                Err(err) => {
                    out.error(ValidationIssue::new(ValidationLayer::Markers, err.to_string()).at(path));
                    continue;
                }
            }
        } else {
            stored
        };

        let actual = sha256_hex(rebuilt.as_bytes());
        if actual != entry.sha256_original {
            out.error(
                ValidationIssue::new(
                    ValidationLayer::Integrity,
                    format!(
                        "Original sha mismatch: expected {}, got {}",
                        entry.sha256_original, actual
                    ),
                )
                .at(path),
            );
        }

        if let Some(root) = root {
            check_disk(root, path, &rebuilt, encoding, out);
        }
    }
    marker_owners
}

fn check_disk(root: &Path, path: &str, rebuilt: &str, encoding: EncodingPolicy, out: &mut Collector<'_>) {
    let Ok(target) = safe_join(root, path) else {
        return;
    };
    match std::fs::read(&target) {
        Ok(bytes) => match decode(&target, bytes, encoding) {
            Ok(text) if text != rebuilt => out.warn(
                ValidationIssue::new(ValidationLayer::Disk, "On-disk file differs from pack").at(path),
            ),
            Ok(_) => {}
            Err(err) => out.error(ValidationIssue::new(ValidationLayer::Disk, err.to_string()).at(path)),
        },
        Err(_) => out.warn(
            ValidationIssue::new(ValidationLayer::Disk, "On-disk file missing under root").at(path),
        ),
    }
}

/// Validate one repository section.
///
/// `root` is the directory holding this section's files, if any.
pub fn validate_section(
    section: &PackSection,
    root: Option<&Path>,
    options: &ValidateOptions,
) -> SectionReport {
    let mut report = SectionReport {
        label: section.label.clone(),
        slug: section.slug.clone(),
        ..Default::default()
    };
    let mut out = Collector {
        report: &mut report,
        strict: options.strict,
    };

    if section.manifest.is_none() {
        out.error(
            ValidationIssue::new(ValidationLayer::Schema, "No codecrate-manifest block found")
                .suggest(MISSING_MANIFEST_HINT),
        );
        return report;
    }

    check_schema(section, &mut out);
    let marker_owners = check_files(section, root, options.encoding, &mut out);

    for id in section.library.keys() {
        if !marker_owners.contains_key(id) {
            out.error(ValidationIssue::new(
                ValidationLayer::Markers,
                format!("Orphan function-library entry: id={}", id),
            ));
        }
    }
    for (id, owners) in &marker_owners {
        if owners.len() > 1 {
            let owners: Vec<&str> = owners.iter().map(String::as_str).collect();
            out.warn(ValidationIssue::new(
                ValidationLayer::Markers,
                format!("Repo-scope marker collision for {}: {}", id, owners.join(", ")),
            ));
        }
    }

    tracing::debug!(
        section = %report.label,
        errors = report.errors.len(),
        warnings = report.warnings.len(),
        "validated section"
    );
    report
}

/// Validate every section of a document.
///
/// Multi-section documents compare section files against `root/<slug>/`.
pub fn validate_document(document: &PackDocument, options: &ValidateOptions) -> ValidationReport {
    let mut report = ValidationReport::default();
    for label in &document.duplicate_labels {
        report.errors.push(
            ValidationIssue::new(
                ValidationLayer::Schema,
                format!("Duplicate repository label '{}'", label),
            )
            .suggest("Give every repository section a distinct label"),
        );
    }

    let multi = document.is_multi_repo();
    for section in &document.sections {
        let root = options.root.as_ref().map(|root| {
            if multi {
                root.join(&section.slug)
            } else {
                root.clone()
            }
        });
        report
            .sections
            .push(validate_section(section, root.as_deref(), options));
    }

    tracing::info!(
        sections = report.sections.len(),
        errors = report.error_count(),
        warnings = report.warning_count(),
        "Validated pack"
    );
    report
}

/// Display a formatted validation report to the user.
#[allow(clippy::print_stdout)]
pub fn display_validation_report(report: &ValidationReport, quiet: bool) {
    if quiet && report.passed() {
        return;
    }

    println!();
    println!("Validation Report");
    println!("=================");

    for error in &report.errors {
        println!("  \u{2717} {}", error);
    }

    for section in &report.sections {
        let status = if section.passed() { "PASSED" } else { "FAILED" };
        println!();
        println!("repo '{}' ({}):", section.label, status);

        for error in &section.errors {
            println!("  \u{2717} {}", error);
        }
        for warning in &section.warnings {
            println!("  \u{26a0} {}", warning);
        }
        if section.errors.is_empty() && section.warnings.is_empty() {
            println!("  \u{2713} All checks passed");
        }
    }

    println!();
    if report.passed() {
        println!(
            "Summary: pack is valid ({} warning(s))",
            report.warning_count()
        );
    } else {
        println!(
            "Summary: {} error(s), {} warning(s)",
            report.error_count(),
            report.warning_count()
        );
    }
}
