//! Patch document rendering and parsing.
//!
//! A patch document holds, per repository section, one
//! `codecrate-patch-meta` block and one fenced `diff` block per changed
//! file under a `` ## `path` `` heading.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::diff::{FileDiff, FileOp, Hunk, LineTag};
use crate::output::fence::fenced_block;
use crate::output::reader::{scan_blocks, split_repository_sections};
use crate::output::{FENCE_PATCH_META, PATCH_FORMAT_VERSION, PATCH_TITLE, REPOSITORY_HEADING};
use crate::utils::error::CodecrateError;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
        .expect("hunk header regex should compile")
});

/// Baseline facts recorded when a patch is generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMeta {
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_manifest_sha256: Option<String>,
    /// path -> baseline `sha256_original` for every changed baseline file
    #[serde(default)]
    pub baseline_files_sha256: BTreeMap<String, String>,
}

impl PatchMeta {
    pub fn new(repo_label: Option<String>, baseline_manifest_sha256: Option<String>) -> Self {
        Self {
            format: PATCH_FORMAT_VERSION.to_string(),
            repo_label,
            baseline_manifest_sha256,
            baseline_files_sha256: BTreeMap::new(),
        }
    }
}

/// Changes for one repository section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSection {
    pub label: String,
    pub slug: String,
    pub meta: Option<PatchMeta>,
    pub files: Vec<FileDiff>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchDocument {
    pub sections: Vec<PatchSection>,
}

impl PatchDocument {
    pub fn is_multi_repo(&self) -> bool {
        self.sections.len() > 1
    }

    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.files.is_empty())
    }

    pub fn file_count(&self) -> usize {
        self.sections.iter().map(|s| s.files.len()).sum()
    }
}

fn render_section(section: &PatchSection) -> Result<String, CodecrateError> {
    let mut out = String::new();
    if let Some(meta) = &section.meta {
        out.push_str(&fenced_block(
            FENCE_PATCH_META,
            &serde_json::to_string_pretty(meta)?,
        ));
        out.push('\n');
    }
    if section.files.is_empty() {
        out.push_str("No changes.\n\n");
    }
    for file in &section.files {
        out.push_str(&format!("## `{}`\n\n", file.path));
        out.push_str(&fenced_block("diff", &file.render()));
        out.push('\n');
    }
    Ok(out)
}

/// Render a patch document.
pub fn render_patch(document: &PatchDocument) -> Result<String, CodecrateError> {
    let mut out = String::new();
    out.push_str(PATCH_TITLE);
    out.push_str("\n\n");
    match document.sections.as_slice() {
        [single] => out.push_str(&render_section(single)?),
        sections => {
            for section in sections {
                out.push_str(&format!("{} {}\n\n", REPOSITORY_HEADING, section.label));
                out.push_str(&render_section(section)?);
            }
        }
    }
    Ok(out)
}

fn diff_path(line: &str, prefix: &str) -> Option<String> {
    let raw = line.trim_end_matches(['\n', '\r']).trim_end();
    if raw == "/dev/null" {
        return None;
    }
    Some(raw.strip_prefix(prefix).unwrap_or(raw).to_string())
}

fn number(caps: &regex::Captures<'_>, idx: usize, default: usize) -> Result<usize, CodecrateError> {
    match caps.get(idx) {
        Some(m) => m
            .as_str()
            .parse()
            .map_err(|_| CodecrateError::parse(format!("Invalid hunk number: {}", m.as_str()))),
        None => Ok(default),
    }
}

/// Converts a 1-based range start to a 0-based line index.
fn zero_based(start: usize, count: usize) -> usize {
    if count == 0 { start } else { start.saturating_sub(1) }
}

/// Parse the unified diff text of a `diff` block.
pub fn parse_file_diffs(text: &str) -> Result<Vec<FileDiff>, CodecrateError> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let mut files: Vec<FileDiff> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix("--- ") {
            let Some(to_line) = lines.get(i + 1).and_then(|l| l.strip_prefix("+++ ")) else {
                return Err(CodecrateError::parse(format!(
                    "Expected '+++' after '--- {}'",
                    rest.trim_end()
                )));
            };
            let from = diff_path(rest, "a/");
            let to = diff_path(to_line, "b/");
            let (path, op) = match (from, to) {
                (None, Some(to)) => (to, FileOp::Add),
                (Some(from), None) => (from, FileOp::Delete),
                (Some(_), Some(to)) => (to, FileOp::Modify),
                (None, None) => {
                    return Err(CodecrateError::parse("Diff has /dev/null on both sides"));
                }
            };
            files.push(FileDiff {
                path,
                op,
                hunks: Vec::new(),
            });
            i += 2;
            continue;
        }

        if line.starts_with("@@") {
            let Some(file) = files.last_mut() else {
                return Err(CodecrateError::parse("Hunk found before any file header"));
            };
            let caps = HUNK_HEADER
                .captures(line)
                .ok_or_else(|| CodecrateError::parse(format!("Malformed hunk header: {}", line.trim_end())))?;
            let old_start = number(&caps, 1, 0)?;
            let old_count = number(&caps, 2, 1)?;
            let new_start = number(&caps, 3, 0)?;
            let new_count = number(&caps, 4, 1)?;
            i += 1;

            let mut hunk_lines = Vec::new();
            let (mut old_seen, mut new_seen) = (0, 0);
            while old_seen < old_count || new_seen < new_count {
                let Some(body) = lines.get(i) else {
                    return Err(CodecrateError::parse(format!(
                        "Hunk for {} ends early",
                        file.path
                    )));
                };
                let (tag, payload) = match body.chars().next() {
                    Some(' ') => (LineTag::Context, &body[1..]),
                    Some('-') => (LineTag::Remove, &body[1..]),
                    Some('+') => (LineTag::Add, &body[1..]),
                    // Editors sometimes strip the space from empty context lines.
                    Some('\n') | Some('\r') => (LineTag::Context, *body),
                    _ => {
                        return Err(CodecrateError::parse(format!(
                            "Unexpected line in hunk for {}: {}",
                            file.path,
                            body.trim_end()
                        )));
                    }
                };
                let mut payload = payload.to_string();
                i += 1;
                if lines.get(i).is_some_and(|next| next.starts_with('\\')) {
                    if payload.ends_with('\n') {
                        payload.pop();
                    }
                    i += 1;
                }
                match tag {
                    LineTag::Context => {
                        old_seen += 1;
                        new_seen += 1;
                    }
                    LineTag::Remove => old_seen += 1,
                    LineTag::Add => new_seen += 1,
                }
                hunk_lines.push((tag, payload));
            }
            if old_seen != old_count || new_seen != new_count {
                return Err(CodecrateError::parse(format!(
                    "Hunk line counts for {} do not match its header",
                    file.path
                )));
            }

            file.hunks.push(Hunk {
                old_start: zero_based(old_start, old_count),
                old_count,
                new_start: zero_based(new_start, new_count),
                new_count,
                lines: hunk_lines,
            });
            continue;
        }

        // `diff --git`, `index` and blank lines carry nothing we need.
        i += 1;
    }
    Ok(files)
}

fn parse_section(label: Option<String>, text: &str) -> Result<PatchSection, CodecrateError> {
    let mut meta: Option<PatchMeta> = None;
    let mut files = Vec::new();

    for block in scan_blocks(text) {
        if block.info == FENCE_PATCH_META {
            if meta.is_some() {
                return Err(CodecrateError::parse("More than one patch metadata block in a section"));
            }
            let parsed: PatchMeta = serde_json::from_str(&block.body)?;
            if parsed.format != PATCH_FORMAT_VERSION {
                return Err(CodecrateError::parse(format!(
                    "Unsupported patch format '{}' (expected {})",
                    parsed.format, PATCH_FORMAT_VERSION
                )));
            }
            meta = Some(parsed);
        } else if block.info == "diff" {
            files.extend(parse_file_diffs(&block.body)?);
        }
    }

    let label = label
        .or_else(|| meta.as_ref().and_then(|m| m.repo_label.clone()))
        .unwrap_or_else(|| "repo".to_string());
    Ok(PatchSection {
        slug: crate::output::slugify(&label),
        label,
        meta,
        files,
    })
}

/// Parse a patch document.
pub fn parse_patch(text: &str) -> Result<PatchDocument, CodecrateError> {
    let raw = split_repository_sections(text);
    let sections = if raw.is_empty() {
        vec![parse_section(None, text)?]
    } else {
        let mut used = std::collections::BTreeSet::new();
        let mut sections = Vec::with_capacity(raw.len());
        for (label, body) in raw {
            let mut section = parse_section(Some(label), &body)?;
            section.slug = crate::output::unique_slug(&section.label, &mut used);
            sections.push(section);
        }
        sections
    };
    tracing::debug!(
        sections = sections.len(),
        files = sections.iter().map(|s| s.files.len()).sum::<usize>(),
        "parsed patch document"
    );
    Ok(PatchDocument { sections })
}
