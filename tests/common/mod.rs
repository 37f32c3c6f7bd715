//! Common test utilities and fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

use codecrate::output::reader::{PackDocument, parse_pack};
use codecrate::output::writer::{WriteOptions, render_pack};
use codecrate::packer::{FileInput, PackConfig, pack_repository};

/// Creates a temporary directory for test fixtures.
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Creates a mock project structure for testing.
pub fn create_mock_project(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
    let root = dir.to_path_buf();

    for (path, content) in files {
        let file_path = root.join(path);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
    }

    root
}

/// Small Python project with two byte-identical helper functions, a class
/// with methods and a module without a trailing newline.
pub fn python_project_files() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "src/app/__init__.py",
            "from .core import run\n",
        ),
        (
            "src/app/core.py",
            r#"import os


def helper(x):
    """Double a value."""
    return x * 2


class Runner:
    def __init__(self, name):
        self.name = name

    def run(self):
        return helper(len(self.name))


def run():
    return Runner(os.getcwd()).run()
"#,
        ),
        (
            "src/app/util.py",
            r#"def helper(x):
    """Double a value."""
    return x * 2


def shout(text):
    return text.upper()
"#,
        ),
        ("scripts/tool.py", "print('tool')"),
        ("README.md", "# demo\n"),
    ]
}

/// The Python fixture as packer inputs, in path order.
pub fn python_inputs() -> Vec<FileInput> {
    let mut inputs: Vec<FileInput> = python_project_files()
        .into_iter()
        .filter(|(path, _)| path.ends_with(".py"))
        .map(|(path, text)| FileInput::new(path, text))
        .collect();
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    inputs
}

/// Pack inputs into a rendered document.
pub fn pack_text(inputs: Vec<FileInput>, config: &PackConfig) -> String {
    let repo = pack_repository("demo", ".", inputs, config).expect("pack should succeed");
    render_pack(&[repo], &WriteOptions::default()).expect("render should succeed")
}

/// Pack inputs and parse the rendered document back.
pub fn pack_document(inputs: Vec<FileInput>, config: &PackConfig) -> PackDocument {
    parse_pack(&pack_text(inputs, config)).expect("document should parse")
}

/// Every regular file under `root`, keyed by `/`-separated relative path.
pub fn read_tree(root: &Path) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir).expect("Failed to read directory") {
            let path = entry.expect("Failed to read entry").path();
            if path.is_dir() {
                stack.push(path);
            } else {
                let relative = path
                    .strip_prefix(root)
                    .expect("path under root")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let text = std::fs::read_to_string(&path).expect("Failed to read file");
                files.insert(relative, text);
            }
        }
    }
    files
}

/// Path to the compiled binary.
pub fn codecrate_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_codecrate"))
}

/// Runs the CLI in `cwd` with an isolated environment.
pub fn run_cli(cwd: &Path, args: &[&str], env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(codecrate_bin());
    cmd.args(args);
    cmd.current_dir(cwd);
    for (key, _) in std::env::vars() {
        if key.starts_with("CODECRATE_") || key == "RUST_LOG" {
            cmd.env_remove(key);
        }
    }
    cmd.envs(env.iter().copied());
    cmd.output().expect("Failed to execute command")
}

/// Asserts success, printing both streams otherwise.
pub fn assert_success(output: &Output) {
    if !output.status.success() {
        eprintln!("CLI exited with code: {:?}", output.status.code());
        eprintln!("STDOUT:\n{}", String::from_utf8_lossy(&output.stdout));
        eprintln!("STDERR:\n{}", String::from_utf8_lossy(&output.stderr));
    }
    assert!(output.status.success(), "Expected command to succeed");
}
