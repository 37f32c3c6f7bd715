//! Integration tests for the codecrate CLI.

mod common;

use std::process::Command;

/// Verify the binary can be invoked and shows help.
#[test]
fn test_cli_help() {
    let output = Command::new(common::codecrate_bin())
        .args(["--help"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("validate-pack"));
    assert!(stdout.contains("Usage"));
}

/// Verify the binary shows version information.
#[test]
fn test_cli_version() {
    let output = Command::new(common::codecrate_bin())
        .args(["--version"])
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[cfg(test)]
mod pack_cli {
    use super::common::{
        assert_success, create_mock_project, create_temp_dir, python_project_files, read_tree,
        run_cli,
    };

    /// Pack a project, unpack it elsewhere and compare the Python files.
    #[test]
    fn test_pack_then_unpack_round_trip() {
        let temp_dir = create_temp_dir();
        let project = create_mock_project(&temp_dir.path().join("project"), &python_project_files());

        let output = run_cli(
            temp_dir.path(),
            &["pack", "project", "--dedupe", "-o", "context.md", "-q"],
            &[],
        );
        assert_success(&output);
        let pack = std::fs::read_to_string(temp_dir.path().join("context.md")).unwrap();
        assert!(pack.starts_with("# Codecrate Context Pack\n"));
        assert!(pack.contains("## Function Library"));
        assert!(!pack.contains("README.md"), "non-Python files are not selected");

        let output = run_cli(
            temp_dir.path(),
            &["unpack", "context.md", "-o", "rebuilt", "--strict", "-q"],
            &[],
        );
        assert_success(&output);

        let original: std::collections::BTreeMap<String, String> = read_tree(&project)
            .into_iter()
            .filter(|(path, _)| path.ends_with(".py"))
            .collect();
        assert_eq!(read_tree(&temp_dir.path().join("rebuilt")), original);
    }

    #[test]
    fn test_pack_summary_lists_output() {
        let temp_dir = create_temp_dir();
        create_mock_project(&temp_dir.path().join("project"), &python_project_files());

        let output = run_cli(temp_dir.path(), &["pack", "project", "-o", "context.md"], &[]);
        assert_success(&output);
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("context.md"));
        assert!(stdout.contains("Files packed: 4"));
    }

    #[test]
    fn test_multi_repo_pack_has_one_section_per_repo() {
        let temp_dir = create_temp_dir();
        create_mock_project(&temp_dir.path().join("alpha"), &[("a.py", "A = 1\n")]);
        create_mock_project(&temp_dir.path().join("beta"), &[("b.py", "B = 2\n")]);

        let output = run_cli(
            temp_dir.path(),
            &["pack", "--repo", "alpha", "--repo", "beta", "-o", "multi.md", "-q"],
            &[],
        );
        assert_success(&output);
        let pack = std::fs::read_to_string(temp_dir.path().join("multi.md")).unwrap();
        assert!(pack.contains("# Repository: alpha\n"));
        assert!(pack.contains("# Repository: beta\n"));

        let output = run_cli(temp_dir.path(), &["unpack", "multi.md", "-o", "out", "-q"], &[]);
        assert_success(&output);
        let tree = read_tree(&temp_dir.path().join("out"));
        assert_eq!(tree["alpha/a.py"], "A = 1\n");
        assert_eq!(tree["beta/b.py"], "B = 2\n");
    }

    #[test]
    fn test_unpack_without_manifest_explains_fix() {
        let temp_dir = create_temp_dir();
        create_mock_project(&temp_dir.path().join("project"), &[("a.py", "A = 1\n")]);

        let output = run_cli(
            temp_dir.path(),
            &["pack", "project", "--no-manifest", "-o", "bare.md", "-q"],
            &[],
        );
        assert_success(&output);

        let output = run_cli(temp_dir.path(), &["unpack", "bare.md", "-o", "out"], &[]);
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("codecrate-manifest"), "stderr: {stderr}");
    }
}

#[cfg(test)]
mod validate_cli {
    use super::common::{assert_success, create_mock_project, create_temp_dir, run_cli};

    fn packed_project() -> tempfile::TempDir {
        let temp_dir = create_temp_dir();
        create_mock_project(
            &temp_dir.path().join("project"),
            &[("a.py", "def a():\n    return 1\n"), ("b.py", "def b():\n    return 2\n")],
        );
        let output = run_cli(
            temp_dir.path(),
            &["pack", "project", "--layout", "full", "-o", "context.md", "-q"],
            &[],
        );
        assert_success(&output);
        temp_dir
    }

    #[test]
    fn test_valid_pack_passes() {
        let temp_dir = packed_project();
        let output = run_cli(
            temp_dir.path(),
            &["validate-pack", "context.md", "--root", "project"],
            &[],
        );
        assert_success(&output);
        assert!(String::from_utf8_lossy(&output.stdout).contains("PASSED"));
    }

    #[test]
    fn test_tampered_pack_fails() {
        let temp_dir = packed_project();
        let path = temp_dir.path().join("context.md");
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("return 2", "return 3")).unwrap();

        let output = run_cli(temp_dir.path(), &["validate-pack", "context.md"], &[]);
        assert_eq!(output.status.code(), Some(1));
        assert!(String::from_utf8_lossy(&output.stdout).contains("FAILED"));
    }
}

#[cfg(test)]
mod patch_cli {
    use super::common::{assert_success, create_mock_project, create_temp_dir, read_tree, run_cli};

    #[test]
    fn test_patch_then_apply_to_fresh_unpack() {
        let temp_dir = create_temp_dir();
        let project = create_mock_project(
            &temp_dir.path().join("project"),
            &[
                ("pkg/core.py", "def f():\n    return 1\n"),
                ("pkg/old.py", "OLD = True\n"),
            ],
        );
        assert_success(&run_cli(
            temp_dir.path(),
            &["pack", "project", "-o", "baseline.md", "-q"],
            &[],
        ));

        std::fs::write(project.join("pkg/core.py"), "def f():\n    return 2\n").unwrap();
        std::fs::remove_file(project.join("pkg/old.py")).unwrap();
        std::fs::write(project.join("pkg/new.py"), "NEW = True\n").unwrap();

        assert_success(&run_cli(
            temp_dir.path(),
            &["patch", "baseline.md", "project", "-o", "changes.md", "-q"],
            &[],
        ));
        let patch = std::fs::read_to_string(temp_dir.path().join("changes.md")).unwrap();
        assert!(patch.starts_with("# Codecrate Patch\n"));
        assert!(patch.contains("## `pkg/core.py`"));

        assert_success(&run_cli(
            temp_dir.path(),
            &["unpack", "baseline.md", "-o", "copy", "-q"],
            &[],
        ));
        let output = run_cli(temp_dir.path(), &["apply", "changes.md", "copy", "--dry-run"], &[]);
        assert_success(&output);
        assert_eq!(
            read_tree(&temp_dir.path().join("copy"))["pkg/core.py"],
            "def f():\n    return 1\n"
        );

        assert_success(&run_cli(
            temp_dir.path(),
            &["apply", "changes.md", "copy", "--check-baseline", "require", "-q"],
            &[],
        ));
        assert_eq!(read_tree(&temp_dir.path().join("copy")), read_tree(&project));
    }

    #[test]
    fn test_apply_rejects_drifted_file() {
        let temp_dir = create_temp_dir();
        let project = create_mock_project(
            &temp_dir.path().join("project"),
            &[("core.py", "def f():\n    return 1\n")],
        );
        assert_success(&run_cli(
            temp_dir.path(),
            &["pack", "project", "-o", "baseline.md", "-q"],
            &[],
        ));
        std::fs::write(project.join("core.py"), "def f():\n    return 2\n").unwrap();
        assert_success(&run_cli(
            temp_dir.path(),
            &["patch", "baseline.md", "project", "-o", "changes.md", "-q"],
            &[],
        ));

        let target = create_mock_project(
            &temp_dir.path().join("target"),
            &[("core.py", "def f():\n    return 1  # edited\n")],
        );
        let output = run_cli(temp_dir.path(), &["apply", "changes.md", "target"], &[]);
        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("core.py"), "stderr: {stderr}");
        assert_eq!(
            std::fs::read_to_string(target.join("core.py")).unwrap(),
            "def f():\n    return 1  # edited\n"
        );
    }
}

#[cfg(test)]
mod config_integration {
    use super::common::{assert_success, create_mock_project, create_temp_dir, run_cli};

    fn project_with_shared_bodies() -> tempfile::TempDir {
        let temp_dir = create_temp_dir();
        let body = "def shared():\n    return 42\n";
        create_mock_project(
            &temp_dir.path().join("project"),
            &[("a.py", body), ("b.py", body)],
        );
        temp_dir
    }

    fn has_library(temp_dir: &tempfile::TempDir) -> bool {
        std::fs::read_to_string(temp_dir.path().join("context.md"))
            .unwrap()
            .contains("## Function Library")
    }

    /// Settings from codecrate.toml in the repository root apply.
    #[test]
    fn test_root_config_file_applies() {
        let temp_dir = project_with_shared_bodies();
        std::fs::write(
            temp_dir.path().join("project/codecrate.toml"),
            "[codecrate]\ndedupe = true\n",
        )
        .unwrap();

        assert_success(&run_cli(temp_dir.path(), &["pack", "project", "-q"], &[]));
        assert!(has_library(&temp_dir));
    }

    /// Config file, then environment, then CLI flags.
    #[test]
    fn test_three_tier_precedence() {
        let temp_dir = project_with_shared_bodies();
        std::fs::write(
            temp_dir.path().join("project/codecrate.toml"),
            "[codecrate]\ndedupe = true\nlayout = \"stubs\"\n",
        )
        .unwrap();

        // Env overrides config
        assert_success(&run_cli(
            temp_dir.path(),
            &["pack", "project", "-q"],
            &[("CODECRATE_LAYOUT", "full")],
        ));
        assert!(!has_library(&temp_dir));

        // CLI overrides env
        assert_success(&run_cli(
            temp_dir.path(),
            &["pack", "project", "--layout", "stubs", "-q"],
            &[("CODECRATE_LAYOUT", "full")],
        ));
        assert!(has_library(&temp_dir));
    }

    /// Test that invalid TOML syntax produces an error.
    #[test]
    fn test_invalid_toml_fails() {
        let temp_dir = project_with_shared_bodies();
        let config_path = temp_dir.path().join("bad.toml");
        std::fs::write(&config_path, "[codecrate\ndedupe = true").unwrap();

        let output = run_cli(
            temp_dir.path(),
            &["pack", "project", "--config", config_path.to_str().unwrap()],
            &[],
        );
        assert!(!output.status.success(), "Should fail with invalid TOML");
    }

    /// An explicit config path must exist.
    #[test]
    fn test_missing_config_file_fails() {
        let temp_dir = project_with_shared_bodies();
        let output = run_cli(
            temp_dir.path(),
            &["pack", "project", "--config", "nonexistent.toml"],
            &[],
        );
        assert!(!output.status.success());
    }
}
