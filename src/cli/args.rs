use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::packer::Layout;
use crate::packer::extract::SymbolBackend;
use crate::packer::walker::EncodingPolicy;
use crate::patch::CheckBaseline;

/// CLI argument parsing.
///
/// Settings also come from `codecrate.toml` and `CODECRATE_*` environment
/// variables; flags given here override both.
/// Example: `CODECRATE_LAYOUT=full` is overridden by `--layout stubs`.
#[derive(Parser, Debug)]
#[command(name = "codecrate")]
#[command(about = "Pack a repository into one Markdown document you can unpack, diff and patch")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Config file path (default: <root>/codecrate.toml)
    #[arg(long, global = true, env = "CODECRATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pack one or more repositories into a context pack
    Pack(PackArgs),
    /// Rebuild the original files from a pack
    Unpack(UnpackArgs),
    /// Diff a baseline pack against the current files
    Patch(PatchArgs),
    /// Apply a patch document to a directory
    Apply(ApplyArgs),
    /// Check a pack for internal consistency
    #[command(name = "validate-pack")]
    ValidatePack(ValidateArgs),
}

#[derive(ClapArgs, Debug, Default)]
pub struct PackArgs {
    /// Repository root
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Pack several repositories, one section each (repeatable)
    #[arg(long = "repo")]
    pub repos: Vec<PathBuf>,

    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Share identical definition bodies through the function library
    #[arg(long)]
    pub dedupe: bool,

    /// Document layout
    #[arg(long)]
    pub layout: Option<Layout>,

    /// Keep docstrings in stubs
    #[arg(long, conflicts_with = "no_keep_docstrings")]
    pub keep_docstrings: bool,

    /// Drop docstrings from stubs
    #[arg(long)]
    pub no_keep_docstrings: bool,

    /// Omit the manifest; the pack can then not be unpacked or patched
    #[arg(long)]
    pub no_manifest: bool,

    /// Do not honor .gitignore files
    #[arg(long)]
    pub no_gitignore: bool,

    /// Include only matching files (repeatable)
    #[arg(long)]
    pub include: Vec<String>,

    /// Exclude matching files (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Split the document into parts of at most this many characters
    #[arg(long)]
    pub split_max_chars: Option<usize>,

    /// Symbol extraction backend for non-Python files
    #[arg(long)]
    pub symbol_backend: Option<SymbolBackend>,

    /// Worker threads (0 = one per core)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    pub max_file_bytes: Option<usize>,

    /// Abort when the pack exceeds this many bytes
    #[arg(long)]
    pub max_total_bytes: Option<usize>,

    /// Skip files with more than this many tokens
    #[arg(long)]
    pub max_file_tokens: Option<usize>,

    /// Abort when the pack exceeds this many tokens
    #[arg(long)]
    pub max_total_tokens: Option<usize>,

    /// How to handle undecodable bytes
    #[arg(long)]
    pub encoding_errors: Option<EncodingPolicy>,
}

#[derive(ClapArgs, Debug)]
pub struct UnpackArgs {
    /// Pack document (part files are joined automatically)
    pub pack: PathBuf,

    /// Output directory
    #[arg(short, long)]
    pub output: PathBuf,

    /// Fail on unresolved markers
    #[arg(long)]
    pub strict: bool,
}

#[derive(ClapArgs, Debug)]
pub struct PatchArgs {
    /// Baseline pack document
    pub baseline: PathBuf,

    /// Root holding the current files
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Patch output path
    #[arg(short, long, default_value = "patch.md")]
    pub output: PathBuf,
}

#[derive(ClapArgs, Debug)]
pub struct ApplyArgs {
    /// Patch document
    pub patch: PathBuf,

    /// Root to apply the patch under
    #[arg(default_value = ".")]
    pub root: PathBuf,

    /// Check everything but write nothing
    #[arg(long)]
    pub dry_run: bool,

    /// How to enforce recorded baseline checksums
    #[arg(long, default_value = "verify")]
    pub check_baseline: CheckBaseline,

    /// Apply clean files even when others conflict
    #[arg(long)]
    pub allow_partial: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ValidateArgs {
    /// Pack document
    pub pack: PathBuf,

    /// Compare rebuilt files with this directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Treat unresolved markers as errors
    #[arg(long)]
    pub strict: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
