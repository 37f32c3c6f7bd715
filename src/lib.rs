//! # codecrate
//!
//! codecrate packs source repositories into a single Markdown document that
//! stays machine-reversible:
//!
//! 1. **Pack** - scan files, extract definitions, deduplicate identical bodies
//!    into a function library and write the document with a manifest
//! 2. **Unpack** - rebuild the original files byte-exactly from a pack
//! 3. **Patch** - diff a baseline pack against the current files
//! 4. **Apply** - apply a patch document, refusing drifted baselines
//! 5. **Validate** - check a pack for internal consistency
//!
//! Configuration follows hierarchical precedence:
//! 1. `codecrate.toml` in the repository root
//! 2. Explicit `--config` path
//! 3. Environment variables (`CODECRATE_*`)
//! 4. CLI flags (highest precedence)
//!
//! The library entry points ([`packer::pack_repository`],
//! [`unpack::reconstruct`], [`patch::generate_patch`],
//! [`patch::apply_patch`], [`utils::validation::validate_document`]) take
//! their settings as explicit values; only [`run`] touches the filesystem
//! layout of a CLI invocation.

pub mod cli;
pub mod output;
pub mod packer;
pub mod patch;
pub mod unpack;
pub mod utils;

use anyhow::{Context, Result};
use cli::args::{ApplyArgs, Args, Command, PackArgs, PatchArgs, UnpackArgs, ValidateArgs};
use output::reader::{PackDocument, load_pack};
use output::writer::{WriteOptions, write_atomic, write_pack};
use packer::walker::{FileSelection, decode};
use packer::{FileInput, pack_repositories, scan_files};
use patch::{ApplyOptions, apply_patch, generate_patch, parse_patch, render_patch};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use utils::paths::safe_join;
use utils::validation::{ValidateOptions, display_validation_report, validate_document};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `-v` enables debug output, `-vv`
/// trace output, and `--quiet` limits logging to errors. Logs go to stderr.
///
/// Returns `false` when a global subscriber was already installed, in which
/// case the existing one is kept.
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let default_level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init()
    {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!("keeping existing tracing subscriber: {}", e);
            false
        }
    }
}

/// Execute one CLI invocation.
///
/// Returns the process exit code: failure when validation finds errors or an
/// apply run leaves conflicts behind. Hard errors propagate as `Err`.
pub async fn run(args: Args) -> Result<ExitCode> {
    tracing::debug!("codecrate v{} starting", env!("CARGO_PKG_VERSION"));
    let config_path = args.config.as_deref();
    match &args.command {
        Command::Pack(pack) => run_pack(pack, config_path, args.quiet).await,
        Command::Unpack(unpack) => run_unpack(unpack, config_path, args.quiet).await,
        Command::Patch(patch) => run_patch(patch, config_path, args.quiet).await,
        Command::Apply(apply) => run_apply(apply, args.quiet).await,
        Command::ValidatePack(validate) => run_validate(validate, config_path, args.quiet).await,
    }
}

/// Section label for a repository root: its directory name.
fn repository_label(root: &Path) -> Result<String> {
    let absolute = std::fs::canonicalize(root)
        .with_context(|| format!("Repository path does not exist: {}", root.display()))?;
    Ok(absolute
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string()))
}

async fn run_pack(args: &PackArgs, config_path: Option<&Path>, quiet: bool) -> Result<ExitCode> {
    let roots: Vec<PathBuf> = if args.repos.is_empty() {
        vec![args.root.clone()]
    } else {
        args.repos.clone()
    };

    let mut config = cli::config::load(config_path, &roots[0])?;
    config.apply_pack_args(args);
    let pack_config = config.pack_config();
    let selection = config.file_selection();

    let mut inputs = Vec::with_capacity(roots.len());
    for root in &roots {
        let label = repository_label(root)?;
        let files = scan_files(root, &selection)
            .await
            .with_context(|| format!("Failed to scan repository {}", root.display()))?;
        tracing::info!(repo = %label, files = files.len(), "Scanned repository");
        inputs.push((label, root.display().to_string(), files));
    }

    let repos = pack_repositories(inputs, &pack_config)?;
    let options = WriteOptions::default()
        .with_manifest(pack_config.manifest)
        .with_split_max_chars(pack_config.split_max_chars);
    let result = write_pack(&repos, &config.output, &options)
        .with_context(|| format!("Failed to write {}", config.output.display()))?;

    utils::summary::display_pack_summary(&repos, &result, quiet)?;
    Ok(ExitCode::SUCCESS)
}

async fn load_document(path: &Path) -> Result<PackDocument> {
    load_pack(path)
        .await
        .with_context(|| format!("Failed to load pack {}", path.display()))
}

async fn run_unpack(args: &UnpackArgs, config_path: Option<&Path>, quiet: bool) -> Result<ExitCode> {
    let config = cli::config::load(config_path, Path::new("."))?;
    let document = load_document(&args.pack).await?;
    let report = unpack::unpack_to_dir(&document, &args.output, args.strict || config.strict)?;
    utils::summary::display_unpack_summary(&report, &args.output, quiet)?;
    Ok(ExitCode::SUCCESS)
}

/// Current files for one baseline section.
///
/// Baseline files that the selection would skip are still read when they
/// exist, so narrowing the include globs does not turn them into deletes.
async fn current_files(
    root: &Path,
    selection: &FileSelection,
    baseline_paths: &[String],
) -> Result<Vec<FileInput>> {
    let mut files = scan_files(root, selection)
        .await
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let scanned: BTreeSet<String> = files.iter().map(|f| f.path.clone()).collect();

    for path in baseline_paths {
        if scanned.contains(path) {
            continue;
        }
        let absolute = safe_join(root, path)?;
        if !absolute.is_file() {
            continue;
        }
        let bytes = tokio::fs::read(&absolute)
            .await
            .with_context(|| format!("Failed to read {}", absolute.display()))?;
        let text = decode(&absolute, bytes, selection.encoding)?;
        files.push(FileInput::new(path.clone(), text));
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

async fn run_patch(args: &PatchArgs, config_path: Option<&Path>, quiet: bool) -> Result<ExitCode> {
    let config = cli::config::load(config_path, &args.root)?;
    let selection = config.file_selection();
    let baseline = load_document(&args.baseline).await?;

    let mut current = Vec::with_capacity(baseline.sections.len());
    for section in &baseline.sections {
        let root = if baseline.is_multi_repo() {
            safe_join(&args.root, &section.slug)?
        } else {
            args.root.clone()
        };
        let baseline_paths: Vec<String> = section
            .require_manifest()?
            .files
            .iter()
            .map(|f| f.path.clone())
            .collect();
        current.push(current_files(&root, &selection, &baseline_paths).await?);
    }

    let patch = generate_patch(&baseline, &current)?;
    let text = render_patch(&patch)?;
    write_atomic(&args.output, text.as_bytes())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    tracing::info!(files = patch.file_count(), out = %args.output.display(), "Wrote patch");

    utils::summary::display_patch_summary(&patch, &args.output, quiet)?;
    Ok(ExitCode::SUCCESS)
}

async fn run_apply(args: &ApplyArgs, quiet: bool) -> Result<ExitCode> {
    let text = tokio::fs::read_to_string(&args.patch)
        .await
        .with_context(|| format!("Failed to read patch {}", args.patch.display()))?;
    let document = parse_patch(&text)?;
    let options = ApplyOptions {
        check_baseline: args.check_baseline,
        dry_run: args.dry_run,
        allow_partial: args.allow_partial,
    };

    let report = apply_patch(&document, &args.root, &options)?;
    utils::summary::display_apply_summary(&report, quiet)?;
    if report.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn run_validate(
    args: &ValidateArgs,
    config_path: Option<&Path>,
    quiet: bool,
) -> Result<ExitCode> {
    let config = cli::config::load(config_path, Path::new("."))?;
    let document = load_document(&args.pack).await?;
    let options = ValidateOptions {
        strict: args.strict || config.strict,
        root: args.root.clone(),
        encoding: config.encoding_errors,
    };

    let report = validate_document(&document, &options);
    display_validation_report(&report, quiet);
    if report.passed() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_logging_init_keeps_first_subscriber() {
        init_logging(0, false);
        assert!(!init_logging(2, false));
    }
}
