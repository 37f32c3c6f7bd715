//! Content identities and deduplication of definition text.
//!
//! Identifiers use the `sha1-8-upper:v1` scheme: the first eight hex digits
//! of a SHA-1 digest, upper-cased. Per-occurrence ids hash the location,
//! canonical ids hash the normalized definition text.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use sha1::Sha1;
use sha2::{Digest, Sha256};

use super::{Definition, LibraryEntry};
use crate::utils::error::CodecrateError;

/// Hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Eight upper-case hex digits of the SHA-1 of `text`.
pub fn short_id(text: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(text.as_bytes());
    let digest = format!("{:X}", hasher.finalize());
    digest[..8].to_string()
}

/// Per-occurrence identifier derived from where a definition lives.
pub fn stable_location_id(path: &str, qualname: &str, def_line: usize) -> String {
    short_id(&format!("{}::{}::{}", path, qualname, def_line))
}

/// True when a line carries nothing but its line terminator.
pub(crate) fn is_blank_line(line: &str) -> bool {
    line.trim_end_matches(['\n', '\r']).is_empty()
}

/// Leading spaces and tabs of a line.
pub(crate) fn leading_whitespace(line: &str) -> &str {
    let end = line
        .char_indices()
        .find(|(_, c)| *c != ' ' && *c != '\t')
        .map(|(i, _)| i)
        .unwrap_or(line.len());
    &line[..end]
}

/// Exact text of a definition: whole lines from its first decorator to its
/// last body line.
pub fn definition_text(lines: &[&str], def: &Definition) -> String {
    let start = def.decorator_start.saturating_sub(1);
    let end = def.end_line.min(lines.len());
    if start >= end {
        return String::new();
    }
    lines[start..end].concat()
}

/// Remove the definition's own indentation when that can be undone exactly.
///
/// Every line must either be blank with no whitespace at all, or start with
/// the indentation and still have content after it. Text that does not meet
/// that shape is returned unchanged.
pub fn normalize_definition(text: &str) -> String {
    let indent = leading_whitespace(text);
    if indent.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.trim_end_matches(['\n', '\r']).is_empty() {
            out.push_str(line);
            continue;
        }
        match line.strip_prefix(indent) {
            Some(rest) if !is_blank_line(rest) => out.push_str(rest),
            _ => return text.to_string(),
        }
    }
    out
}

/// Inverse of [`normalize_definition`] for a target indentation.
///
/// Text whose first line is already indented was stored verbatim and is
/// returned as-is.
pub fn reindent(text: &str, indent: &str) -> String {
    if indent.is_empty() || !leading_whitespace(text).is_empty() {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len() + indent.len() * 8);
    for line in text.split_inclusive('\n') {
        if !is_blank_line(line) {
            out.push_str(indent);
        }
        out.push_str(line);
    }
    out
}

/// Result of canonical id assignment across a whole pack.
#[derive(Debug, Default)]
pub struct Canonicalized {
    /// canonical id -> representative entry, first occurrence wins
    pub library: BTreeMap<String, LibraryEntry>,
    /// number of marker occurrences per canonical id
    pub marker_uses: BTreeMap<String, usize>,
}

impl Canonicalized {
    /// True when at least two stubbed occurrences share a canonical id.
    pub fn has_shared_bodies(&self) -> bool {
        self.marker_uses.values().any(|count| *count >= 2)
    }
}

/// One file's definitions together with the source they were taken from.
pub struct CanonicalInput<'a> {
    pub source: &'a str,
    pub defs: &'a mut [Definition],
}

/// Assign canonical ids and collect library entries.
///
/// Files must be given in manifest order so the stored representative is the
/// first occurrence by path. Two different texts that map onto one id abort
/// with `IdentifierCollision`.
pub fn assign_canonical_ids(
    inputs: &mut [CanonicalInput<'_>],
    dedupe: bool,
) -> Result<Canonicalized, CodecrateError> {
    let mut result = Canonicalized::default();
    let mut seen_text: BTreeMap<String, (String, String)> = BTreeMap::new();
    let mut seen_local: BTreeMap<String, String> = BTreeMap::new();

    for input in inputs.iter_mut() {
        let lines: Vec<&str> = input.source.split_inclusive('\n').collect();
        for def in input.defs.iter_mut() {
            let location = format!("{}:{} ({})", def.path, def.def_line, def.qualname);

            match seen_local.entry(def.local_id.clone()) {
                Entry::Occupied(first) => {
                    return Err(CodecrateError::IdentifierCollision {
                        id: def.local_id.clone(),
                        first: first.get().clone(),
                        second: location,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(location.clone());
                }
            }

            let mut normalized = normalize_definition(&definition_text(&lines, def));
            if !normalized.ends_with('\n') {
                // the marker line carries the missing terminator
                normalized.push('\n');
            }
            def.canonical_id = if dedupe {
                short_id(&normalized)
            } else {
                def.local_id.clone()
            };

            match seen_text.entry(def.canonical_id.clone()) {
                Entry::Occupied(first) => {
                    let (first_text, first_location) = first.get();
                    if *first_text != normalized {
                        return Err(CodecrateError::IdentifierCollision {
                            id: def.canonical_id.clone(),
                            first: first_location.clone(),
                            second: location,
                        });
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert((normalized.clone(), location));
                }
            }

            if def.has_marker {
                *result
                    .marker_uses
                    .entry(def.canonical_id.clone())
                    .or_insert(0) += 1;
                result
                    .library
                    .entry(def.canonical_id.clone())
                    .or_insert_with(|| LibraryEntry {
                        id: def.canonical_id.clone(),
                        text: normalized,
                        path: def.path.clone(),
                        qualname: def.qualname.clone(),
                    });
            }
        }
    }

    tracing::debug!(
        entries = result.library.len(),
        dedupe,
        "canonical ids assigned"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_shape() {
        let id = short_id("def f():\n    return 1\n");
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_location_id_is_stable() {
        assert_eq!(
            stable_location_id("a.py", "f", 3),
            stable_location_id("a.py", "f", 3)
        );
        assert_ne!(
            stable_location_id("a.py", "f", 3),
            stable_location_id("a.py", "f", 4)
        );
    }

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_normalize_and_reindent_are_inverse() {
        let text = "    def m(self):\n        x = 1\n\n        return x\n";
        let normalized = normalize_definition(text);
        assert_eq!(normalized, "def m(self):\n    x = 1\n\n    return x\n");
        assert_eq!(reindent(&normalized, "    "), text);
    }

    #[test]
    fn test_normalize_keeps_text_with_whitespace_only_lines() {
        let text = "    def m(self):\n        x = 1\n    \n        return x\n";
        assert_eq!(normalize_definition(text), text);
        assert_eq!(reindent(text, "    "), text);
    }

    #[test]
    fn test_normalize_keeps_text_with_outdented_continuation() {
        let text = "    def m(self):\n        s = \"\"\"\nraw\n\"\"\"\n";
        assert_eq!(normalize_definition(text), text);
    }

    #[test]
    fn test_methods_at_different_depths_share_identity() {
        let a = normalize_definition("def f():\n    return 1\n");
        let b = normalize_definition("    def f():\n        return 1\n");
        assert_eq!(short_id(&a), short_id(&b));
    }
}
