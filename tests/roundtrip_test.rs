//! Pack, reconstruct and unpack flows through the library API.

mod common;

use codecrate::output::reader::{load_pack, parse_pack};
use codecrate::output::writer::{WriteOptions, part_path, render_pack, write_pack};
use codecrate::packer::{FileInput, Layout, PackConfig, pack_repositories, pack_repository};
use codecrate::unpack::{reconstruct, unpack_to_dir};
use codecrate::utils::error::CodecrateError;
use common::{create_temp_dir, pack_document, pack_text, python_inputs, read_tree};

fn config(dedupe: bool, layout: Layout) -> PackConfig {
    PackConfig {
        dedupe,
        layout,
        ..Default::default()
    }
}

fn assert_reconstructs_inputs(config: &PackConfig) {
    let inputs = python_inputs();
    let document = pack_document(inputs.clone(), config);
    let sections = reconstruct(&document, true).expect("reconstruct should succeed");
    assert_eq!(sections.len(), 1);

    let rebuilt: Vec<FileInput> = sections[0]
        .files
        .iter()
        .map(|f| FileInput::new(f.path.clone(), f.text.clone()))
        .collect();
    assert_eq!(rebuilt, inputs);
    assert!(sections[0].files.iter().all(|f| f.checksum_ok));
}

#[test]
fn test_full_layout_round_trip() {
    assert_reconstructs_inputs(&config(false, Layout::Full));
}

#[test]
fn test_stub_layout_round_trip() {
    assert_reconstructs_inputs(&config(false, Layout::Stubs));
}

#[test]
fn test_deduplicated_stub_layout_round_trip() {
    assert_reconstructs_inputs(&config(true, Layout::Stubs));
}

#[test]
fn test_missing_trailing_newline_is_preserved() {
    let document = pack_document(python_inputs(), &config(true, Layout::Stubs));
    let manifest = document.sections[0].require_manifest().unwrap();
    let tool = manifest
        .files
        .iter()
        .find(|f| f.path == "scripts/tool.py")
        .unwrap();
    assert!(tool.no_trailing_newline);

    let sections = reconstruct(&document, true).unwrap();
    assert_eq!(sections[0].file("scripts/tool.py").unwrap().text, "print('tool')");
}

#[test]
fn test_dedupe_shares_identical_helpers() {
    let repo = pack_repository("demo", ".", python_inputs(), &config(true, Layout::Auto)).unwrap();
    assert_eq!(repo.layout, Layout::Stubs);
    assert!(repo.report.library_entries < repo.report.definitions);

    let helpers: Vec<&str> = repo
        .files
        .iter()
        .flat_map(|f| &f.defs)
        .filter(|d| d.qualname == "helper")
        .map(|d| d.canonical_id.as_str())
        .collect();
    assert_eq!(helpers.len(), 2);
    assert_eq!(helpers[0], helpers[1]);
}

#[test]
fn test_auto_layout_without_dedupe_is_full() {
    let repo = pack_repository("demo", ".", python_inputs(), &config(false, Layout::Auto)).unwrap();
    assert_eq!(repo.layout, Layout::Full);
    assert!(repo.library.is_empty());
}

#[test]
fn test_output_is_identical_across_worker_counts() {
    let single = PackConfig {
        workers: 1,
        ..config(true, Layout::Stubs)
    };
    let pooled = PackConfig {
        workers: 4,
        ..config(true, Layout::Stubs)
    };
    assert_eq!(
        pack_text(python_inputs(), &single),
        pack_text(python_inputs(), &pooled)
    );
}

#[test]
fn test_input_order_does_not_change_output() {
    let mut reversed = python_inputs();
    reversed.reverse();
    let cfg = config(true, Layout::Stubs);
    assert_eq!(pack_text(python_inputs(), &cfg), pack_text(reversed, &cfg));
}

#[test]
fn test_tampered_file_block_fails_integrity() {
    let mut document = pack_document(python_inputs(), &config(false, Layout::Full));
    let block = document.sections[0]
        .files
        .iter_mut()
        .find(|(path, _)| path == "src/app/util.py")
        .unwrap();
    block.1 = block.1.replace("upper", "lower");

    let err = reconstruct(&document, false).unwrap_err();
    assert!(
        matches!(err, CodecrateError::IntegrityMismatch { ref path, .. } if path == "src/app/util.py"),
        "unexpected error: {err:?}"
    );
}

#[test]
fn test_missing_library_entry_strict_and_lenient() {
    let mut document = pack_document(python_inputs(), &config(true, Layout::Stubs));
    let id = document.sections[0].library.keys().next().unwrap().clone();
    document.sections[0].library.remove(&id);

    let err = reconstruct(&document, true).unwrap_err();
    assert!(matches!(err, CodecrateError::UnresolvedMarker { id: ref missing, .. } if *missing == id));

    let sections = reconstruct(&document, false).unwrap();
    assert!(sections[0].unresolved_count() >= 1);
    assert!(sections[0].files.iter().any(|f| !f.checksum_ok));
}

#[test]
fn test_pack_without_manifest_cannot_be_reconstructed() {
    let repo = pack_repository("demo", ".", python_inputs(), &PackConfig::default()).unwrap();
    let text = render_pack(&[repo], &WriteOptions::default().with_manifest(false)).unwrap();
    let document = parse_pack(&text).unwrap();
    let err = reconstruct(&document, false).unwrap_err();
    assert!(matches!(err, CodecrateError::MissingManifest));
}

#[test]
fn test_multi_repo_unpack_writes_slug_directories() {
    let cfg = config(true, Layout::Auto);
    let repos = pack_repositories(
        vec![
            ("alpha".to_string(), "alpha".to_string(), python_inputs()),
            (
                "beta tools".to_string(),
                "beta".to_string(),
                vec![FileInput::new("main.py", "def main():\n    pass\n")],
            ),
        ],
        &cfg,
    )
    .unwrap();
    let text = render_pack(&repos, &WriteOptions::default()).unwrap();
    assert!(text.contains("# Repository: alpha\n"));
    assert!(text.contains("# Repository: beta tools\n"));

    let document = parse_pack(&text).unwrap();
    assert_eq!(document.sections.len(), 2);
    assert_eq!(document.sections[1].slug, "beta-tools");

    let out = create_temp_dir();
    let report = unpack_to_dir(&document, out.path(), true).unwrap();
    assert_eq!(report.unresolved_markers, 0);

    let tree = read_tree(out.path());
    assert_eq!(tree["beta-tools/main.py"], "def main():\n    pass\n");
    assert_eq!(tree["alpha/scripts/tool.py"], "print('tool')");
    assert_eq!(tree.len(), python_inputs().len() + 1);
}

#[tokio::test]
async fn test_split_parts_are_joined_on_load() {
    let dir = create_temp_dir();
    let output = dir.path().join("context.md");
    let repo = pack_repository("demo", ".", python_inputs(), &config(true, Layout::Stubs)).unwrap();
    let whole = render_pack(std::slice::from_ref(&repo), &WriteOptions::default()).unwrap();

    let options = WriteOptions::default().with_split_max_chars(whole.len() / 3);
    let result = write_pack(std::slice::from_ref(&repo), &output, &options).unwrap();
    assert!(result.paths.len() > 1);
    assert_eq!(result.paths[1], part_path(&output, 2));

    let joined: String = result
        .paths
        .iter()
        .map(|p| std::fs::read_to_string(p).unwrap())
        .collect();
    assert_eq!(joined, whole);

    let document = load_pack(&output).await.unwrap();
    let sections = reconstruct(&document, true).unwrap();
    assert_eq!(sections[0].files.len(), python_inputs().len());
}

#[test]
fn test_rewrite_with_fewer_parts_removes_stale_parts() {
    let dir = create_temp_dir();
    let output = dir.path().join("context.md");
    let repo = pack_repository("demo", ".", python_inputs(), &config(true, Layout::Stubs)).unwrap();
    let repos = std::slice::from_ref(&repo);

    let split = write_pack(repos, &output, &WriteOptions::default().with_split_max_chars(200)).unwrap();
    assert!(split.paths.len() > 2);

    let single = write_pack(repos, &output, &WriteOptions::default()).unwrap();
    assert_eq!(single.paths.len(), 1);
    assert!(!part_path(&output, 2).exists());
}

/// Function layouts that exercise the stub header boundary.
fn varied_layouts() -> Vec<(&'static str, &'static str)> {
    vec![
        ("blank_after_signature.py", "def f():\n\n    return 1\n"),
        (
            "comment_then_blank.py",
            "class C:\n    def m(self):\n        # note\n\n        return 2\n",
        ),
        ("docstring_only_eof.py", "def f():\n    \"\"\"Doc.\"\"\""),
        (
            "decorated_docstring.py",
            "@decorator\ndef f():\n    \"\"\"Doc.\"\"\"\n    return 1\n",
        ),
        (
            "stacked_decorators.py",
            "@a\n@b(1)\ndef g(x):\n\n    \"\"\"Multi\n\n    line.\n    \"\"\"\n\n    return x\n",
        ),
        ("inline.py", "def f(): return 1\n"),
        ("inline_eof.py", "def f(): return 1"),
        (
            "multiline_signature.py",
            "def f(\n    a,\n    b,\n):\n    return a + b\n",
        ),
        (
            "class_members.py",
            "class K:\n    \"\"\"Class doc.\"\"\"\n\n    @property\n    def p(self):\n        return 1\n\n    async def q(self):\n        pass\n",
        ),
        (
            "nested.py",
            "def outer():\n    def inner():\n        return 1\n    return inner\n",
        ),
        ("tabs.py", "def t():\n\treturn 1\n"),
        (
            "whitespace_blank.py",
            "class C:\n    def m(self):\n        x = 1\n    \n        return x\n",
        ),
        ("shared_a.py", "def f():\n\n    return 1\n"),
    ]
}

#[test]
fn test_varied_layouts_reconstruct_exactly() {
    let inputs: Vec<FileInput> = varied_layouts()
        .into_iter()
        .map(|(path, text)| FileInput::new(path, text))
        .collect();

    for dedupe in [false, true] {
        for keep_docstrings in [true, false] {
            let cfg = PackConfig {
                keep_docstrings,
                ..config(dedupe, Layout::Stubs)
            };
            let document = pack_document(inputs.clone(), &cfg);
            let sections = reconstruct(&document, true).unwrap_or_else(|e| {
                panic!("dedupe={dedupe} keep_docstrings={keep_docstrings}: {e}")
            });
            for input in &inputs {
                let rebuilt = sections[0].file(&input.path).unwrap();
                assert_eq!(
                    rebuilt.text, input.text,
                    "{} (dedupe={dedupe} keep_docstrings={keep_docstrings})",
                    input.path
                );
                assert!(rebuilt.checksum_ok);
            }
        }
    }
}

#[test]
fn test_varied_layouts_unpack_to_disk() {
    let inputs: Vec<FileInput> = varied_layouts()
        .into_iter()
        .map(|(path, text)| FileInput::new(path, text))
        .collect();
    let document = pack_document(inputs.clone(), &config(true, Layout::Stubs));

    let out = create_temp_dir();
    let report = unpack_to_dir(&document, out.path(), true).unwrap();
    assert_eq!(report.unresolved_markers, 0);

    let expected: std::collections::BTreeMap<String, String> =
        inputs.into_iter().map(|f| (f.path, f.text)).collect();
    assert_eq!(read_tree(out.path()), expected);
}

#[test]
fn test_docstring_only_function_at_eof_keeps_marker_line() {
    let inputs = vec![FileInput::new("m.py", "def f():\n    \"\"\"Doc.\"\"\"")];
    let repo = pack_repository("demo", ".", inputs, &config(false, Layout::Stubs)).unwrap();
    let stub = repo.files[0].stub.as_deref().unwrap();
    let marker = stub.lines().last().unwrap();
    assert!(marker.trim_start().starts_with("...  # "), "stub: {stub:?}");
    assert!(stub.contains("\"\"\"Doc.\"\"\"\n"));
}
