//! Manifest and machine header for one repository section.

use serde::{Deserialize, Serialize};

use super::{ID_FORMAT_VERSION, PACK_FORMAT_VERSION};
use crate::packer::canonical::sha256_hex;
use crate::packer::stub::MARKER_FORMAT_VERSION;
use crate::packer::{Definition, DefinitionKind, Layout, PackedFile, PackedRepo};
use crate::utils::error::CodecrateError;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One definition as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDef {
    pub path: String,
    pub module: String,
    pub qualname: String,
    /// Canonical id
    pub id: String,
    pub local_id: String,
    pub kind: DefinitionKind,
    pub decorator_start: usize,
    pub def_line: usize,
    pub body_start: usize,
    pub end_line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_end: Option<usize>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_single_line: bool,
    pub has_marker: bool,
}

impl From<&Definition> for ManifestDef {
    fn from(def: &Definition) -> Self {
        Self {
            path: def.path.clone(),
            module: def.module.clone(),
            qualname: def.qualname.clone(),
            id: def.canonical_id.clone(),
            local_id: def.local_id.clone(),
            kind: def.kind,
            decorator_start: def.decorator_start,
            def_line: def.def_line,
            body_start: def.body_start,
            end_line: def.end_line,
            doc_start: def.doc_start,
            doc_end: def.doc_end,
            is_single_line: def.body_column.is_some(),
            has_marker: def.has_marker,
        }
    }
}

/// One file entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub path: String,
    pub module: String,
    pub line_count: usize,
    pub sha256_original: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_stubbed: Option<String>,
    /// The file's last line has no terminator
    #[serde(default, skip_serializing_if = "is_false")]
    pub no_trailing_newline: bool,
    #[serde(default)]
    pub classes: Vec<ManifestDef>,
    #[serde(default)]
    pub defs: Vec<ManifestDef>,
}

impl From<&PackedFile> for ManifestFile {
    fn from(file: &PackedFile) -> Self {
        let (classes, defs): (Vec<&Definition>, Vec<&Definition>) = file
            .defs
            .iter()
            .partition(|d| d.kind == DefinitionKind::Class);
        Self {
            path: file.path.clone(),
            module: file.module.clone(),
            line_count: file.line_count,
            sha256_original: file.sha256_original.clone(),
            sha256_stubbed: file.sha256_stubbed.clone(),
            no_trailing_newline: !file.has_trailing_newline(),
            classes: classes.into_iter().map(ManifestDef::from).collect(),
            defs: defs.into_iter().map(ManifestDef::from).collect(),
        }
    }
}

/// The manifest of a repository section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub id_format_version: String,
    pub marker_format_version: String,
    pub root: String,
    pub layout: Layout,
    pub files: Vec<ManifestFile>,
}

impl Manifest {
    pub fn from_repo(repo: &PackedRepo) -> Self {
        Self {
            format: PACK_FORMAT_VERSION.to_string(),
            id_format_version: ID_FORMAT_VERSION.to_string(),
            marker_format_version: MARKER_FORMAT_VERSION.to_string(),
            root: repo.root.clone(),
            layout: repo.layout,
            files: repo.files.iter().map(ManifestFile::from).collect(),
        }
    }

    pub fn file(&self, path: &str) -> Option<&ManifestFile> {
        self.files.iter().find(|f| f.path == path)
    }

    /// SHA-256 of the canonical serialization: compact JSON with object keys
    /// sorted.
    pub fn sha256(&self) -> Result<String, CodecrateError> {
        canonical_sha256(&serde_json::to_value(self)?)
    }

    /// Pretty JSON as embedded in the document.
    pub fn to_pretty_json(&self) -> Result<String, CodecrateError> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

/// Small header for cheap staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineHeader {
    pub format: String,
    pub manifest_sha256: String,
    pub repo_label: String,
    pub repo_slug: String,
}

impl MachineHeader {
    pub fn new(manifest: &Manifest, label: &str, slug: &str) -> Result<Self, CodecrateError> {
        Ok(Self {
            format: PACK_FORMAT_VERSION.to_string(),
            manifest_sha256: manifest.sha256()?,
            repo_label: label.to_string(),
            repo_slug: slug.to_string(),
        })
    }
}

/// SHA-256 of compact JSON for a parsed value.
///
/// `Value` objects keep their keys sorted, so the serialization is canonical
/// whatever order the source document used.
pub fn canonical_sha256(value: &serde_json::Value) -> Result<String, CodecrateError> {
    let canonical = serde_json::to_string(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// True for a lowercase 64-digit hex string.
pub fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64
        && value
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
