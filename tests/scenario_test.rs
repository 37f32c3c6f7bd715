//! End-to-end scenarios: pack, unpack, diff and apply through the library.

mod common;

use codecrate::packer::canonical::sha256_hex;
use codecrate::packer::stub::find_markers;
use codecrate::packer::{FileInput, Layout, PackConfig, pack_repository};
use codecrate::patch::apply::FileAction;
use codecrate::patch::{
    ApplyOptions, CheckBaseline, apply_patch, generate_patch, parse_patch, render_patch,
};
use codecrate::unpack::{reconstruct, unpack_to_dir};
use codecrate::utils::error::CodecrateError;
use common::{create_mock_project, create_temp_dir, pack_document, read_tree};

fn stubs(dedupe: bool) -> PackConfig {
    PackConfig {
        dedupe,
        layout: Layout::Stubs,
        ..Default::default()
    }
}

#[test]
fn test_two_one_line_functions_get_distinct_ids_and_markers() {
    let source = "def a(): return 1\ndef b(): return 2\n";
    let inputs = vec![FileInput::new("one.py", source)];

    let repo = pack_repository("demo", ".", inputs.clone(), &stubs(true)).unwrap();
    let defs = &repo.files[0].defs;
    assert_eq!(defs.len(), 2);
    assert_ne!(defs[0].local_id, defs[1].local_id);
    assert_ne!(defs[0].canonical_id, defs[1].canonical_id);

    let stub = repo.files[0].stub.as_deref().unwrap();
    let markers = find_markers(stub);
    assert_eq!(markers.len(), 2);
    assert_ne!(markers[0].id, markers[1].id);

    let document = pack_document(inputs, &stubs(true));
    let manifest = document.sections[0].require_manifest().unwrap();
    assert_eq!(manifest.files[0].defs.len(), 2);

    let out = create_temp_dir();
    unpack_to_dir(&document, out.path(), true).unwrap();
    assert_eq!(read_tree(out.path())["one.py"], source);
}

fn identical_bodies() -> Vec<FileInput> {
    let body = "def compute(values):\n    total = 0\n    for v in values:\n        total += v\n    return total\n";
    vec![
        FileInput::new("a.py", body),
        FileInput::new("b.py", body),
    ]
}

#[test]
fn test_identical_bodies_share_one_library_entry() {
    let auto = PackConfig {
        dedupe: true,
        ..Default::default()
    };
    let repo = pack_repository("demo", ".", identical_bodies(), &auto).unwrap();
    assert_eq!(repo.layout, Layout::Stubs);
    assert_eq!(repo.library.len(), 1);
    assert_eq!(
        repo.files[0].defs[0].canonical_id,
        repo.files[1].defs[0].canonical_id
    );
}

#[test]
fn test_identical_bodies_without_dedupe_stay_apart() {
    let repo = pack_repository("demo", ".", identical_bodies(), &stubs(false)).unwrap();
    assert_ne!(
        repo.files[0].defs[0].canonical_id,
        repo.files[1].defs[0].canonical_id
    );
    assert_eq!(repo.library.len(), 2);

    let auto = pack_repository("demo", ".", identical_bodies(), &PackConfig::default()).unwrap();
    assert_eq!(auto.layout, Layout::Full);
}

#[test]
fn test_dangling_marker_placeholder_in_lenient_mode() {
    let source = "def f():\n    return 1\n";
    let mut document = pack_document(vec![FileInput::new("f.py", source)], &stubs(false));
    document.sections[0].library.clear();

    let err = reconstruct(&document, true).unwrap_err();
    assert!(matches!(err, CodecrateError::UnresolvedMarker { .. }));

    let out = create_temp_dir();
    let report = unpack_to_dir(&document, out.path(), false).unwrap();
    assert_eq!(report.unresolved_markers, 1);
    assert_eq!(read_tree(out.path())["f.py"], "def f():\n    ...\n");
}

const BASELINE: &str = "def keep():\n    return 0\n\n\ndef change():\n    return 1\n";
const CURRENT: &str = "def keep():\n    return 0\n\n\ndef change():\n    return 2\n";

fn baseline_and_patch() -> (Vec<FileInput>, String) {
    let baseline = vec![FileInput::new("pkg/mod.py", BASELINE)];
    let document = pack_document(baseline.clone(), &stubs(true));
    let patch = generate_patch(&document, &[vec![FileInput::new("pkg/mod.py", CURRENT)]]).unwrap();

    let section = &patch.sections[0];
    assert_eq!(section.files.len(), 1);
    assert_eq!(section.files[0].hunks.len(), 1);
    let meta = section.meta.as_ref().unwrap();
    assert_eq!(
        meta.baseline_files_sha256["pkg/mod.py"],
        sha256_hex(BASELINE.as_bytes())
    );

    (baseline, render_patch(&patch).unwrap())
}

#[test]
fn test_patch_applies_to_unmodified_baseline() {
    let (_, text) = baseline_and_patch();
    let dir = create_temp_dir();
    create_mock_project(dir.path(), &[("pkg/mod.py", BASELINE)]);

    let document = parse_patch(&text).unwrap();
    let report = apply_patch(&document, dir.path(), &ApplyOptions::default()).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.changed.len(), 1);
    assert_eq!(report.changed[0].1, FileAction::Modified);
    assert_eq!(read_tree(dir.path())["pkg/mod.py"], CURRENT);
}

#[test]
fn test_patch_refuses_drifted_baseline() {
    let (_, text) = baseline_and_patch();
    let drifted = BASELINE.replace("return 0", "return 0  # local edit");
    let dir = create_temp_dir();
    create_mock_project(dir.path(), &[("pkg/mod.py", drifted.as_str())]);

    let document = parse_patch(&text).unwrap();
    let err = apply_patch(&document, dir.path(), &ApplyOptions::default()).unwrap_err();
    assert!(
        matches!(err, CodecrateError::BaselineConflict { ref path, .. } if path == "pkg/mod.py"),
        "unexpected error: {err:?}"
    );
    assert_eq!(read_tree(dir.path())["pkg/mod.py"], drifted);

    let ignore = ApplyOptions {
        check_baseline: CheckBaseline::Ignore,
        ..Default::default()
    };
    let report = apply_patch(&document, dir.path(), &ignore).unwrap();
    assert!(report.is_clean());
    assert_eq!(
        read_tree(dir.path())["pkg/mod.py"],
        CURRENT.replace("return 0", "return 0  # local edit")
    );
}

#[test]
fn test_patch_round_trip_with_adds_and_deletes() {
    let baseline = vec![
        FileInput::new("keep.py", "x = 1\n"),
        FileInput::new("old.py", "def gone():\n    pass\n"),
        FileInput::new("tail.py", "y = 1"),
    ];
    let current = vec![
        FileInput::new("keep.py", "x = 1\n"),
        FileInput::new("new/deep/fresh.py", "def fresh():\n    return True\n"),
        FileInput::new("tail.py", "y = 2\n"),
    ];
    let document = pack_document(baseline.clone(), &PackConfig::default());
    let patch = generate_patch(&document, &[current.clone()]).unwrap();
    let parsed = parse_patch(&render_patch(&patch).unwrap()).unwrap();
    assert_eq!(parsed, patch);

    let dir = create_temp_dir();
    let files: Vec<(&str, &str)> = baseline
        .iter()
        .map(|f| (f.path.as_str(), f.text.as_str()))
        .collect();
    create_mock_project(dir.path(), &files);

    let options = ApplyOptions {
        check_baseline: CheckBaseline::Require,
        ..Default::default()
    };
    let report = apply_patch(&parsed, dir.path(), &options).unwrap();
    assert!(report.is_clean());

    let expected: std::collections::BTreeMap<String, String> = current
        .into_iter()
        .map(|f| (f.path, f.text))
        .collect();
    assert_eq!(read_tree(dir.path()), expected);
}

#[test]
fn test_patch_with_unsafe_path_is_refused() {
    let text = "# Codecrate Patch\n\n## `../escape.py`\n\n```diff\n--- /dev/null\n+++ b/../escape.py\n@@ -0,0 +1 @@\n+x = 1\n```\n";
    let dir = create_temp_dir();
    let project = dir.path().join("project");
    std::fs::create_dir_all(&project).unwrap();

    let document = parse_patch(text).unwrap();
    let options = ApplyOptions {
        check_baseline: CheckBaseline::Ignore,
        ..Default::default()
    };
    let err = apply_patch(&document, &project, &options).unwrap_err();
    assert!(matches!(err, CodecrateError::UnsafePath { .. }));
    assert!(!dir.path().join("escape.py").exists());
}
