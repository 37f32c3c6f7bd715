// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

//! Pack document parsing.
//!
//! Documents are read line by line with fence tracking, so headings or
//! fences that appear inside embedded file content are never mistaken for
//! document structure.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::path::Path;

use serde_json::Value;
use tokio::fs;

use super::fence::{is_fence_close, parse_fence_open};
use super::manifest::{MachineHeader, Manifest};
use super::writer::part_path;
use super::{
    FENCE_MACHINE_HEADER, FENCE_MANIFEST, REPOSITORY_HEADING, SECTION_FILES, SECTION_LIBRARY,
    unique_slug,
};
use crate::utils::error::CodecrateError;

/// A fenced block with the headings it appeared under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Closest `## ` heading above the block
    pub section: Option<String>,
    /// Closest `### ` heading above the block within the section
    pub heading: Option<String>,
    pub info: String,
    pub body: String,
}

/// Collect fenced blocks in document order.
///
/// An unterminated fence runs to the end of the text.
pub fn scan_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut section: Option<String> = None;
    let mut heading: Option<String> = None;
    let mut open: Option<(String, String, String)> = None;

    for line in text.split_inclusive('\n') {
        if let Some((fence, info, mut body)) = open.take() {
            if is_fence_close(line, &fence) {
                blocks.push(FencedBlock {
                    section: section.clone(),
                    heading: heading.clone(),
                    info,
                    body,
                });
            } else {
                body.push_str(line);
                open = Some((fence, info, body));
            }
            continue;
        }

        if let Some((fence, info)) = parse_fence_open(line) {
            open = Some((fence, info, String::new()));
        } else if let Some(title) = line.strip_prefix("### ") {
            heading = Some(title.trim().to_string());
        } else if line.starts_with("## ") {
            section = Some(line.trim().to_string());
            heading = None;
        } else if line.starts_with("# ") {
            section = None;
            heading = None;
        }
    }

    if let Some((_, info, body)) = open {
        blocks.push(FencedBlock {
            section,
            heading,
            info,
            body,
        });
    }
    blocks
}

/// Path inside a `` ### `path` `` heading.
pub fn backticked_path(heading: &str) -> Option<&str> {
    let start = heading.find('`')? + 1;
    let end = start + heading[start..].find('`')?;
    let path = &heading[start..end];
    if path.is_empty() { None } else { Some(path) }
}

/// Split a document at `# Repository:` headings outside fences.
///
/// Returns `(label, body)` pairs; empty when the document has no repository
/// headings.
pub fn split_repository_sections(text: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    let mut fence: Option<String> = None;

    for line in text.split_inclusive('\n') {
        match &fence {
            Some(open) => {
                if is_fence_close(line, open) {
                    fence = None;
                }
            }
            None => {
                if let Some((open, _)) = parse_fence_open(line) {
                    fence = Some(open);
                } else if let Some(rest) = line.strip_prefix(REPOSITORY_HEADING) {
                    let label = match rest.trim() {
                        "" => format!("repo-{}", sections.len() + 1),
                        other => other.to_string(),
                    };
                    sections.push((label, String::new()));
                    continue;
                }
            }
        }
        if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
        }
    }
    sections
}

/// One repository section of a parsed pack.
#[derive(Debug, Clone, Default)]
pub struct PackSection {
    pub label: String,
    pub slug: String,
    pub machine_header: Option<MachineHeader>,
    /// Number of machine header blocks seen; only the first is parsed
    pub machine_header_blocks: usize,
    pub manifest: Option<Manifest>,
    pub manifest_blocks: usize,
    /// Manifest exactly as embedded, for checksum verification
    pub manifest_value: Option<Value>,
    /// id -> library text
    pub library: BTreeMap<String, String>,
    /// ids that appeared more than once in the library
    pub duplicate_library_ids: Vec<String>,
    /// file blocks in document order
    pub files: Vec<(String, String)>,
    /// paths that had more than one file block
    pub duplicate_files: Vec<String>,
}

impl PackSection {
    /// The manifest, or `MissingManifest`.
    pub fn require_manifest(&self) -> Result<&Manifest, CodecrateError> {
        self.manifest.as_ref().ok_or(CodecrateError::MissingManifest)
    }

    pub fn file_block(&self, path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, body)| body.as_str())
    }
}

/// A parsed pack document: an ordered list of sections.
#[derive(Debug, Clone, Default)]
pub struct PackDocument {
    pub sections: Vec<PackSection>,
    /// Labels claimed by more than one section
    pub duplicate_labels: Vec<String>,
}

impl PackDocument {
    pub fn is_multi_repo(&self) -> bool {
        self.sections.len() > 1
    }
}

fn parse_section(label: Option<String>, text: &str) -> Result<PackSection, CodecrateError> {
    let mut section = PackSection::default();
    let mut seen_files = BTreeSet::new();

    for block in scan_blocks(text) {
        if block.info == FENCE_MACHINE_HEADER {
            section.machine_header_blocks += 1;
            if section.machine_header.is_none() {
                let header: MachineHeader = serde_json::from_str(&block.body).map_err(|err| {
                    parse_error("Invalid machine header JSON", Some(Box::new(err)))
                })?;
                section.machine_header = Some(header);
            }
            continue;
        }
        if block.info == FENCE_MANIFEST {
            section.manifest_blocks += 1;
            if section.manifest.is_none() {
                let value: Value = serde_json::from_str(&block.body).map_err(|err| {
                    parse_error("Invalid manifest JSON", Some(Box::new(err)))
                })?;
                let manifest: Manifest = serde_json::from_value(value.clone()).map_err(|err| {
                    parse_error("Manifest does not match the pack schema", Some(Box::new(err)))
                })?;
                section.manifest = Some(manifest);
                section.manifest_value = Some(value);
            }
            continue;
        }

        let (Some(heading_section), Some(heading)) = (&block.section, &block.heading) else {
            continue;
        };
        if heading_section == SECTION_LIBRARY {
            let Some(id) = heading.split_whitespace().next() else {
                continue;
            };
            if section.library.contains_key(id) {
                section.duplicate_library_ids.push(id.to_string());
                continue;
            }
            section.library.insert(id.to_string(), block.body);
        } else if heading_section.starts_with(SECTION_FILES) {
            let Some(path) = backticked_path(heading) else {
                continue;
            };
            if !seen_files.insert(path.to_string()) {
                section.duplicate_files.push(path.to_string());
                continue;
            }
            section.files.push((path.to_string(), block.body));
        }
    }

    section.label = label
        .or_else(|| section.machine_header.as_ref().map(|h| h.repo_label.clone()))
        .unwrap_or_else(|| "repo".to_string());
    Ok(section)
}

/// Parse a full pack document.
pub fn parse_pack(text: &str) -> Result<PackDocument, CodecrateError> {
    let mut document = PackDocument::default();
    let mut used_slugs = BTreeSet::new();
    let mut seen_labels = BTreeSet::new();

    let raw_sections = split_repository_sections(text);
    let parsed: Vec<PackSection> = if raw_sections.is_empty() {
        vec![parse_section(None, text)?]
    } else {
        raw_sections
            .into_iter()
            .map(|(label, body)| parse_section(Some(label), &body))
            .collect::<Result<_, _>>()?
    };

    for mut section in parsed {
        if !seen_labels.insert(section.label.clone()) {
            document.duplicate_labels.push(section.label.clone());
        }
        section.slug = unique_slug(&section.label, &mut used_slugs);
        document.sections.push(section);
    }

    tracing::debug!(sections = document.sections.len(), "parsed pack document");
    Ok(document)
}

/// Read a document and any sibling part files, in order.
pub async fn read_document(path: &Path) -> Result<String, CodecrateError> {
    let mut text = read_to_string(path).await?;
    let mut n = 2;
    loop {
        let part = part_path(path, n);
        if !fs::try_exists(&part).await.unwrap_or(false) {
            break;
        }
        tracing::debug!(part = %part.display(), "joining part file");
        text.push_str(&read_to_string(&part).await?);
        n += 1;
    }
    Ok(text)
}

async fn read_to_string(path: &Path) -> Result<String, CodecrateError> {
    let bytes = fs::read(path).await.map_err(|e| {
        CodecrateError::FileSystem(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;
    String::from_utf8(bytes).map_err(|_| CodecrateError::Encoding {
        path: path.to_path_buf(),
    })
}

/// Read and parse a pack document from disk.
pub async fn load_pack(path: &Path) -> Result<PackDocument, CodecrateError> {
    let text = read_document(path).await?;
    let document = parse_pack(&text)?;
    tracing::info!(
        file = %path.display(),
        sections = document.sections.len(),
        "Loaded pack"
    );
    Ok(document)
}

fn parse_error(
    message: impl Into<String>,
    source: Option<Box<dyn Error + Send + Sync>>,
) -> CodecrateError {
    CodecrateError::ParseError {
        message: message.into(),
        source,
    }
}
