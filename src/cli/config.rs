//! Configuration management using the `config` crate for layered merging.
//!
//! ## Configuration Sources (in precedence order, highest to lowest):
//! 1. **CLI flags** - applied last through [`Config::apply_pack_args`]
//! 2. **Environment variables** - `CODECRATE_*` (e.g. `CODECRATE_LAYOUT=stubs`,
//!    `CODECRATE_INCLUDE=**/*.py,**/*.pyi`)
//! 3. **Explicit `--config` file** - must exist when given
//! 4. **`codecrate.toml`** in the repository root - optional
//!
//! Both files keep their settings under a `[codecrate]` table:
//!
//! ```toml
//! [codecrate]
//! dedupe = true
//! layout = "stubs"
//! exclude = ["tests/**"]
//! ```
//!
//! ## Usage:
//! ```rust,no_run
//! use codecrate::cli::config;
//! use std::path::Path;
//!
//! let config = config::load(None, Path::new("."))?;
//! let pack_config = config.pack_config();
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::cli::args::PackArgs;
use crate::packer::budget::BudgetLimits;
use crate::packer::extract::SymbolBackend;
use crate::packer::walker::{EncodingPolicy, FileSelection};
use crate::packer::{Layout, PackConfig};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "codecrate.toml";

/// Table holding the settings inside a config file.
const CONFIG_TABLE: &str = "codecrate";

const ENV_PREFIX: &str = "CODECRATE";

/// Settings merged from config files and the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub dedupe: bool,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default = "default_true")]
    pub keep_docstrings: bool,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default = "default_include")]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default = "default_true")]
    pub manifest: bool,
    /// 0 disables splitting
    #[serde(default)]
    pub split_max_chars: usize,
    #[serde(default)]
    pub encoding_errors: EncodingPolicy,
    #[serde(default)]
    pub symbol_backend: SymbolBackend,
    #[serde(default)]
    pub max_file_bytes: usize,
    #[serde(default)]
    pub max_file_tokens: usize,
    #[serde(default)]
    pub max_total_bytes: usize,
    #[serde(default)]
    pub max_total_tokens: usize,
    /// 0 sizes the worker pool automatically
    #[serde(default)]
    pub workers: usize,
    #[serde(default)]
    pub strict: bool,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_include() -> Vec<String> {
    vec!["**/*.py".to_string()]
}

fn default_output() -> PathBuf {
    PathBuf::from("context.md")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dedupe: false,
            layout: Layout::Auto,
            keep_docstrings: true,
            respect_gitignore: true,
            include: default_include(),
            exclude: Vec::new(),
            manifest: true,
            split_max_chars: 0,
            encoding_errors: EncodingPolicy::Replace,
            symbol_backend: SymbolBackend::Auto,
            max_file_bytes: 0,
            max_file_tokens: 0,
            max_total_bytes: 0,
            max_total_tokens: 0,
            workers: 0,
            strict: false,
            output: default_output(),
        }
    }
}

impl Config {
    /// Overlay the flags given on the command line.
    pub fn apply_pack_args(&mut self, args: &PackArgs) {
        if args.dedupe {
            self.dedupe = true;
        }
        if let Some(layout) = args.layout {
            self.layout = layout;
        }
        if args.keep_docstrings {
            self.keep_docstrings = true;
        }
        if args.no_keep_docstrings {
            self.keep_docstrings = false;
        }
        if args.no_manifest {
            self.manifest = false;
        }
        if args.no_gitignore {
            self.respect_gitignore = false;
        }
        if !args.include.is_empty() {
            self.include = args.include.clone();
        }
        if !args.exclude.is_empty() {
            self.exclude = args.exclude.clone();
        }
        if let Some(output) = &args.output {
            self.output = output.clone();
        }

        let overrides = [
            (&mut self.split_max_chars, args.split_max_chars),
            (&mut self.workers, args.workers),
            (&mut self.max_file_bytes, args.max_file_bytes),
            (&mut self.max_file_tokens, args.max_file_tokens),
            (&mut self.max_total_bytes, args.max_total_bytes),
            (&mut self.max_total_tokens, args.max_total_tokens),
        ];
        for (slot, value) in overrides {
            if let Some(value) = value {
                *slot = value;
            }
        }

        if let Some(backend) = args.symbol_backend {
            self.symbol_backend = backend;
        }
        if let Some(policy) = args.encoding_errors {
            self.encoding_errors = policy;
        }
    }

    /// Library-facing pack settings.
    pub fn pack_config(&self) -> PackConfig {
        PackConfig {
            dedupe: self.dedupe,
            layout: self.layout,
            keep_docstrings: self.keep_docstrings,
            manifest: self.manifest,
            symbol_backend: self.symbol_backend,
            encoding_errors: self.encoding_errors,
            budgets: BudgetLimits {
                max_file_bytes: self.max_file_bytes,
                max_file_tokens: self.max_file_tokens,
                max_total_bytes: self.max_total_bytes,
                max_total_tokens: self.max_total_tokens,
            },
            workers: self.workers,
            split_max_chars: self.split_max_chars,
        }
    }

    /// Which files a scan of the repository should pick up.
    pub fn file_selection(&self) -> FileSelection {
        FileSelection {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            respect_gitignore: self.respect_gitignore,
            encoding: self.encoding_errors,
        }
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("include")
        .with_list_parse_key("exclude")
}

/// Read the `[codecrate]` table from the config files, if any.
fn load_files(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    let mut builder = config::Config::builder()
        .add_source(config::File::from(root.join(CONFIG_FILE_NAME)).required(false));
    if let Some(path) = explicit {
        builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
    }

    let settings = builder
        .build()
        .context("Failed to read configuration files")?;
    match settings.get::<Config>(CONFIG_TABLE) {
        Ok(config) => Ok(config),
        Err(config::ConfigError::NotFound(_)) => Ok(Config::default()),
        Err(e) => Err(e).context("Invalid [codecrate] table in configuration"),
    }
}

fn load_with_env(explicit: Option<&Path>, root: &Path, env: config::Environment) -> Result<Config> {
    let file_config = load_files(explicit, root)?;
    let base = config::Config::try_from(&file_config)
        .context("Failed to stage file configuration")?;

    config::Config::builder()
        .add_source(base)
        .add_source(env)
        .build()
        .context("Failed to build configuration")?
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

/// Load configuration for a repository root.
///
/// `explicit` is the `--config` path; it must exist when given.
pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Config> {
    let config = load_with_env(explicit, root, environment())?;
    tracing::debug!(?config, "Loaded configuration");
    Ok(config)
}
