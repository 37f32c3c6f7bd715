//! Pack document format: constants, writer, reader and helpers.

pub mod fence;
pub mod manifest;
pub mod reader;
pub mod writer;

use std::collections::BTreeSet;

pub const PACK_FORMAT_VERSION: &str = "codecrate.v4";
pub const PATCH_FORMAT_VERSION: &str = "codecrate.patch.v1";
pub const ID_FORMAT_VERSION: &str = "sha1-8-upper:v1";
pub const MARKER_NAMESPACE: &str = "FUNC";

pub const FENCE_MACHINE_HEADER: &str = "codecrate-machine-header";
pub const FENCE_MANIFEST: &str = "codecrate-manifest";
pub const FENCE_PATCH_META: &str = "codecrate-patch-meta";

pub const PACK_TITLE: &str = "# Codecrate Context Pack";
pub const PATCH_TITLE: &str = "# Codecrate Patch";
pub const REPOSITORY_HEADING: &str = "# Repository:";

pub const SECTION_MACHINE_HEADER: &str = "## Machine Header";
pub const SECTION_MANIFEST: &str = "## Manifest";
pub const SECTION_INDEX: &str = "## Symbol Index";
pub const SECTION_LIBRARY: &str = "## Function Library";
pub const SECTION_FILES: &str = "## Files";

pub const MISSING_MANIFEST_HINT: &str = "No codecrate-manifest block found. This pack cannot be used for \
unpack/patch/validate-pack; re-run `codecrate pack` with --manifest (or omit --no-manifest).";

/// Filesystem-safe slug for a repository label.
///
/// Alphanumerics, `-` and `_` are kept, everything else becomes `-`; runs of
/// dashes collapse and the result is never empty.
pub fn slugify(label: &str) -> String {
    let mut slug = String::with_capacity(label.len());
    for ch in label.chars() {
        let mapped = if ch.is_alphanumeric() || ch == '-' || ch == '_' {
            ch
        } else {
            '-'
        };
        if mapped == '-' && slug.ends_with('-') {
            continue;
        }
        slug.push(mapped);
    }
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        "repo".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Slug for `label` not yet in `used`, suffixed `-2`, `-3`... on clashes.
pub fn unique_slug(label: &str, used: &mut BTreeSet<String>) -> String {
    let base = slugify(label);
    let mut slug = base.clone();
    let mut idx = 2;
    while used.contains(&slug) {
        slug = format!("{}-{}", base, idx);
        idx += 1;
    }
    used.insert(slug.clone());
    slug
}
