//! Stub/marker codec.
//!
//! Packing replaces each stubbed definition body with a single marker line
//! `...  # ↪ FUNC:v1:<ID>` at the body's indentation. Unpacking finds the
//! header lines above each marker and swaps header plus marker for the
//! library text of the referenced id.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use super::Definition;
use super::canonical::{leading_whitespace, reindent};
use crate::output::MARKER_NAMESPACE;
use crate::utils::error::CodecrateError;

/// Marker format version written into every marker.
pub const MARKER_FORMAT_VERSION: &str = "v1";

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([ \t]*)\.\.\.[ \t]+#[ \t]*(?:\x{21aa}[ \t]*)?FUNC:(v\d+):([0-9A-F]{8})[ \t]*$")
        .expect("marker line regex should compile")
});

static MARKER_ANYWHERE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"FUNC:v\d+:[0-9A-F]{8}").expect("marker token regex should compile")
});

/// A marker found on a stub line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRef {
    /// zero-based line index in the stub
    pub line: usize,
    pub indent: String,
    pub version: String,
    pub id: String,
}

/// Render the marker line for an id.
pub fn marker_line(indent: &str, id: &str) -> String {
    format!(
        "{}...  # \u{21aa} {}:{}:{}",
        indent, MARKER_NAMESPACE, MARKER_FORMAT_VERSION, id
    )
}

/// Parse a single line as a marker line.
pub fn parse_marker_line(line: &str) -> Option<(String, String, String)> {
    let caps = MARKER_LINE.captures(line.trim_end_matches(['\n', '\r']))?;
    Some((
        caps[1].to_string(),
        caps[2].to_string(),
        caps[3].to_string(),
    ))
}

/// All marker lines in a stub, in order.
pub fn find_markers(stub: &str) -> Vec<MarkerRef> {
    stub.split_inclusive('\n')
        .enumerate()
        .filter_map(|(line, text)| {
            parse_marker_line(text).map(|(indent, version, id)| MarkerRef {
                line,
                indent,
                version,
                id,
            })
        })
        .collect()
}

/// True if text contains anything shaped like a marker token.
pub fn contains_marker_token(text: &str) -> bool {
    MARKER_ANYWHERE.is_match(text)
}

/// Replace the bodies of stubbed definitions with marker lines.
///
/// Only definitions with `has_marker` are touched. Header lines (decorators,
/// signature and, with `keep_docstrings`, the docstring) are kept verbatim.
pub fn render_stub(source: &str, defs: &[Definition], keep_docstrings: bool) -> String {
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let mut stubbed: Vec<&Definition> = defs.iter().filter(|d| d.has_marker).collect();
    stubbed.sort_by_key(|d| d.decorator_start);

    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;

    for def in stubbed {
        let start = def.decorator_start.saturating_sub(1);
        let end = def.end_line.min(lines.len());
        if start < cursor || start >= end {
            tracing::debug!(path = %def.path, qualname = %def.qualname, "skipping overlapping stub span");
            continue;
        }
        for line in &lines[cursor..start] {
            out.push_str(line);
        }

        let def_indent = leading_whitespace(lines[start]);
        let body_row = def.body_start.saturating_sub(1).min(end - 1);
        let marker_indent = match def.body_column {
            Some(column) => {
                for line in &lines[start..body_row] {
                    out.push_str(line);
                }
                let head = lines[body_row].get(..column).unwrap_or(lines[body_row]);
                out.push_str(head.trim_end());
                out.push('\n');
                format!("{}    ", def_indent)
            }
            None => {
                let keep_end = match (keep_docstrings, def.doc_end) {
                    (true, Some(doc_end)) => doc_end.min(end),
                    _ => body_row,
                };
                for line in &lines[start..keep_end.max(start)] {
                    out.push_str(line);
                }
                leading_whitespace(lines[body_row]).to_string()
            }
        };

        // A kept final line without a terminator still ends before the marker.
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&marker_line(&marker_indent, &def.canonical_id));
        if lines[end - 1].ends_with('\n') {
            out.push('\n');
        }
        cursor = end;
    }

    for line in &lines[cursor.min(lines.len())..] {
        out.push_str(line);
    }
    out
}

/// Outcome of expanding the markers of one stub.
#[derive(Debug, Default)]
pub struct Expansion {
    pub text: String,
    /// ids that could not be resolved, in stub order
    pub unresolved: Vec<String>,
}

/// Rebuild a file from its stub and the library.
///
/// In strict mode the first unresolved marker is an error. Otherwise the
/// marker is left as a bare `...` placeholder and reported.
pub fn expand_markers(
    path: &str,
    stub: &str,
    library: &BTreeMap<String, String>,
    strict: bool,
) -> Result<Expansion, CodecrateError> {
    let lines: Vec<&str> = stub.split_inclusive('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut unresolved = Vec::new();

    for (m, line) in lines.iter().enumerate() {
        let Some((indent, _version, id)) = parse_marker_line(line) else {
            out.push((*line).to_string());
            continue;
        };

        let resolved = library.get(&id).and_then(|text| {
            let span = text.split_inclusive('\n').count();
            let lowest = m.saturating_sub(span);
            (lowest..m)
                .rev()
                .find_map(|i| header_matches(&lines[i..m], text).map(|full| (i, full)))
        });

        match resolved {
            Some((i, mut full)) => {
                out.truncate(out.len() - (m - i));
                if !line.ends_with('\n') && full.ends_with('\n') {
                    full.pop();
                }
                out.push(full);
            }
            None => {
                if strict {
                    return Err(CodecrateError::UnresolvedMarker {
                        path: path.to_string(),
                        id,
                    });
                }
                tracing::warn!(path, id = %id, "unresolved marker left as placeholder");
                let newline = if line.ends_with('\n') { "\n" } else { "" };
                out.push(format!("{}...{}", indent, newline));
                unresolved.push(id);
            }
        }
    }

    Ok(Expansion {
        text: out.concat(),
        unresolved,
    })
}

/// If `header` is the start of `text` re-indented at the header's level,
/// return the re-indented text.
///
/// Header lines must match exactly. Two relaxations apply: the text's final
/// line may lack the terminator the stub had to add before its marker, and
/// the last header line may be a signature whose inline body was cut off.
fn header_matches(header: &[&str], text: &str) -> Option<String> {
    let first = header.first()?;
    let full = reindent(text, leading_whitespace(first));
    let candidate: Vec<&str> = full.split_inclusive('\n').collect();
    if candidate.len() < header.len() {
        return None;
    }
    let last = header.len() - 1;
    let matched = header
        .iter()
        .zip(&candidate)
        .enumerate()
        .all(|(j, (line, expected))| {
            line == expected
                || terminated_copy(line, expected)
                || (j == last && inline_signature(line, expected))
        });
    matched.then_some(full)
}

/// `line` is `expected` plus the newline it was missing at end of file.
fn terminated_copy(line: &str, expected: &str) -> bool {
    !expected.ends_with('\n') && line.strip_suffix('\n') == Some(expected)
}

/// `line` is the signature part of `expected`, a one-line definition.
fn inline_signature(line: &str, expected: &str) -> bool {
    let head = line.strip_suffix('\n').unwrap_or(line);
    if head.trim().is_empty() || !head.ends_with(':') {
        return false;
    }
    expected
        .strip_prefix(head)
        .is_some_and(|rest| !rest.trim().is_empty())
}
