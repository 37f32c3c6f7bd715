pub mod budget;
pub mod canonical;
pub mod extract;
pub mod gitignore;
pub mod stub;
pub mod walker;

use std::collections::BTreeSet;
use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::output::unique_slug;
use crate::utils::error::CodecrateError;
use budget::{BudgetLimits, BudgetTracker};
use canonical::{CanonicalInput, assign_canonical_ids, sha256_hex};
use extract::{SymbolBackend, extractor_for, module_name_for};
use walker::EncodingPolicy;

pub use walker::{FileSelection, scan_files};

/// One source file handed to the packer: a normalized relative path and its
/// decoded text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInput {
    pub path: String,
    pub text: String,
}

impl FileInput {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Kind of an extracted definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    Function,
    Method,
    Class,
    /// Type-like symbol from a non-primary language grammar
    Type,
}

impl DefinitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Type => "type",
        }
    }
}

/// A function, method or class with its exact line span.
///
/// All line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub path: String,
    pub module: String,
    pub qualname: String,
    pub kind: DefinitionKind,
    /// First decorator line, or `def_line` when undecorated
    pub decorator_start: usize,
    pub def_line: usize,
    /// Line on which the body block starts
    pub body_start: usize,
    /// Byte column of the body when it shares a line with the signature
    pub body_column: Option<usize>,
    pub end_line: usize,
    pub doc_start: Option<usize>,
    pub doc_end: Option<usize>,
    /// Whether the body is replaced by a marker in stub layout
    pub has_marker: bool,
    pub local_id: String,
    pub canonical_id: String,
}

/// Requested document layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    /// Stubs when deduplication collapsed something, full otherwise
    #[default]
    Auto,
    Stubs,
    Full,
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Stubs => write!(f, "stubs"),
            Self::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for Layout {
    type Err = CodecrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "stubs" | "stub" => Ok(Self::Stubs),
            "full" => Ok(Self::Full),
            other => Err(CodecrateError::invalid_layout(other)),
        }
    }
}

/// Everything a pack operation needs to know, passed explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    pub dedupe: bool,
    pub layout: Layout,
    pub keep_docstrings: bool,
    /// Emit the manifest and machine header blocks
    pub manifest: bool,
    pub symbol_backend: SymbolBackend,
    pub encoding_errors: EncodingPolicy,
    #[serde(flatten)]
    pub budgets: BudgetLimits,
    /// Worker threads for extraction; 0 sizes the pool automatically
    pub workers: usize,
    /// Split the document into parts of at most this many characters; 0 disables
    pub split_max_chars: usize,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            dedupe: false,
            layout: Layout::Auto,
            keep_docstrings: true,
            manifest: true,
            symbol_backend: SymbolBackend::Auto,
            encoding_errors: EncodingPolicy::Replace,
            budgets: BudgetLimits::default(),
            workers: 0,
            split_max_chars: 0,
        }
    }
}

/// A representative definition text stored once in the function library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub id: String,
    /// Definition text with its own indentation removed when reversible
    pub text: String,
    pub path: String,
    pub qualname: String,
}

/// One file after packing.
#[derive(Debug, Clone)]
pub struct PackedFile {
    pub path: String,
    pub module: String,
    pub text: String,
    /// Marker-substituted text, present in stub layout only
    pub stub: Option<String>,
    pub defs: Vec<Definition>,
    pub line_count: usize,
    pub sha256_original: String,
    pub sha256_stubbed: Option<String>,
}

impl PackedFile {
    /// Text that goes into the document's file block.
    pub fn emitted_text(&self) -> &str {
        self.stub.as_deref().unwrap_or(&self.text)
    }

    pub fn has_trailing_newline(&self) -> bool {
        self.text.is_empty() || self.text.ends_with('\n')
    }
}

/// Summary of a pack operation for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PackReport {
    pub files_packed: usize,
    pub definitions: usize,
    pub library_entries: usize,
    pub layout: Option<Layout>,
    pub parse_skipped: Vec<String>,
    pub budget_skipped: Vec<String>,
    pub total_bytes: usize,
    pub total_tokens: usize,
}

/// One repository section of a pack document.
#[derive(Debug, Clone)]
pub struct PackedRepo {
    pub label: String,
    pub slug: String,
    /// Root as displayed in the document
    pub root: String,
    /// Resolved layout, never `Auto`
    pub layout: Layout,
    pub files: Vec<PackedFile>,
    pub library: Vec<LibraryEntry>,
    pub report: PackReport,
}

/// Per-file extraction outcome produced by the worker pool.
struct Extracted {
    input: FileInput,
    module: String,
    defs: Vec<Definition>,
    skipped: Option<String>,
}

fn extract_one(input: FileInput, backend: SymbolBackend) -> Result<Extracted, CodecrateError> {
    let module = module_name_for(&input.path);
    let extractor = extractor_for(&input.path, backend);
    match extractor.extract(&input.path, &module, &input.text) {
        Ok(defs) => {
            tracing::debug!(
                path = %input.path,
                extractor = extractor.name(),
                defs = defs.len(),
                "extracted definitions"
            );
            Ok(Extracted {
                input,
                module,
                defs,
                skipped: None,
            })
        }
        Err(CodecrateError::ParseSkipped { path, reason }) => {
            tracing::warn!(path = %path, reason = %reason, "parse skipped, file kept verbatim");
            Ok(Extracted {
                input,
                module,
                defs: Vec::new(),
                skipped: Some(path),
            })
        }
        Err(e) => Err(e),
    }
}

/// Manifest line count: newline characters plus one, zero for an empty file.
///
/// A file ending in a newline counts the empty line after it, so packs agree
/// with those produced by earlier codecrate releases.
pub fn line_count(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        text.matches('\n').count() + 1
    }
}

/// Bounded worker pool shared by every parallel phase of one pack run.
///
/// When the pool cannot be built, work runs sequentially on the caller's
/// thread.
pub(crate) struct WorkerPool {
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Pool with `workers` threads; 0 sizes it automatically.
    pub(crate) fn new(workers: usize) -> Self {
        let pool = match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::debug!("falling back to sequential work: {}", e);
                None
            }
        };
        Self { pool }
    }

    /// Run `job` over `items`, preserving input order.
    pub(crate) fn map<T, R, F>(&self, items: Vec<T>, job: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        match &self.pool {
            Some(pool) if !items.is_empty() => {
                pool.install(|| items.into_par_iter().map(&job).collect())
            }
            _ => items.into_iter().map(job).collect(),
        }
    }
}

/// Pack one repository's files.
///
/// Budgets are applied first in path order, then definitions are extracted
/// in parallel, then canonical ids are assigned over the whole set. The
/// result is independent of the worker count.
pub fn pack_repository(
    label: &str,
    root: &str,
    inputs: Vec<FileInput>,
    config: &PackConfig,
) -> Result<PackedRepo, CodecrateError> {
    let pool = WorkerPool::new(config.workers);
    pack_with_pool(label, root, inputs, config, &pool)
}

fn pack_with_pool(
    label: &str,
    root: &str,
    mut inputs: Vec<FileInput>,
    config: &PackConfig,
    pool: &WorkerPool,
) -> Result<PackedRepo, CodecrateError> {
    inputs.sort_by(|a, b| a.path.cmp(&b.path));
    inputs.dedup_by(|a, b| a.path == b.path);

    let mut report = PackReport::default();
    let mut tracker = BudgetTracker::new(config.budgets)?;
    let mut admitted = Vec::with_capacity(inputs.len());
    for input in inputs {
        match tracker.admit(&input.path, &input.text) {
            Ok(()) => admitted.push(input),
            Err(e) if e.is_per_file() => {
                tracing::warn!("{}", e);
                report.budget_skipped.push(input.path);
            }
            Err(e) => return Err(e),
        }
    }
    report.total_bytes = tracker.total_bytes();
    report.total_tokens = tracker.total_tokens();

    let backend = config.symbol_backend;
    let extracted: Vec<Extracted> =
        pool.map(admitted, |input| extract_one(input, backend))
            .into_iter()
            .collect::<Result<_, _>>()?;

    let mut extracted = extracted;
    report.parse_skipped = extracted
        .iter()
        .filter_map(|e| e.skipped.clone())
        .collect();

    let canonical = {
        let mut canonical_inputs: Vec<CanonicalInput<'_>> = extracted
            .iter_mut()
            .map(|e| CanonicalInput {
                source: &e.input.text,
                defs: &mut e.defs,
            })
            .collect();
        assign_canonical_ids(&mut canonical_inputs, config.dedupe)?
    };

    let layout = match config.layout {
        Layout::Auto if canonical.has_shared_bodies() => Layout::Stubs,
        Layout::Auto => Layout::Full,
        other => other,
    };

    let keep_docstrings = config.keep_docstrings;
    let files: Vec<PackedFile> = pool.map(extracted, |e| {
        let mut defs = e.defs;
        let stub = if layout == Layout::Stubs {
            Some(stub::render_stub(&e.input.text, &defs, keep_docstrings))
        } else {
            for def in defs.iter_mut() {
                def.has_marker = false;
            }
            None
        };
        PackedFile {
            line_count: line_count(&e.input.text),
            sha256_original: sha256_hex(e.input.text.as_bytes()),
            sha256_stubbed: stub.as_ref().map(|s| sha256_hex(s.as_bytes())),
            path: e.input.path,
            module: e.module,
            text: e.input.text,
            stub,
            defs,
        }
    });

    let library: Vec<LibraryEntry> = if layout == Layout::Stubs {
        canonical.library.into_values().collect()
    } else {
        Vec::new()
    };

    report.files_packed = files.len();
    report.definitions = files.iter().map(|f| f.defs.len()).sum();
    report.library_entries = library.len();
    report.layout = Some(layout);

    tracing::info!(
        repo = label,
        files = report.files_packed,
        definitions = report.definitions,
        library = report.library_entries,
        layout = %layout,
        "packed repository"
    );

    Ok(PackedRepo {
        label: label.to_string(),
        slug: String::new(),
        root: root.to_string(),
        layout,
        files,
        library,
        report,
    })
}

/// Pack several repositories into an ordered list of sections.
///
/// Labels must be unique; slugs are derived from labels with a numeric
/// suffix on clashes.
pub fn pack_repositories(
    repos: Vec<(String, String, Vec<FileInput>)>,
    config: &PackConfig,
) -> Result<Vec<PackedRepo>, CodecrateError> {
    let mut labels = BTreeSet::new();
    let mut slugs = BTreeSet::new();
    let mut sections = Vec::with_capacity(repos.len());
    let pool = WorkerPool::new(config.workers);

    for (label, root, inputs) in repos {
        if !labels.insert(label.clone()) {
            return Err(CodecrateError::ValidationError {
                message: format!("Duplicate repository label '{}'", label),
                suggestion: "Give each repository a distinct directory name".to_string(),
            });
        }
        let mut packed = pack_with_pool(&label, &root, inputs, config, &pool)?;
        packed.slug = unique_slug(&label, &mut slugs);
        sections.push(packed);
    }
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> Vec<FileInput> {
        vec![
            FileInput::new("b.py", "def g():\n    return 1\n"),
            FileInput::new("a.py", "def f():\n    return 1\n"),
        ]
    }

    #[test]
    fn test_layout_parse() {
        assert_eq!("stubs".parse::<Layout>().unwrap(), Layout::Stubs);
        assert_eq!("FULL".parse::<Layout>().unwrap(), Layout::Full);
        assert!("bogus".parse::<Layout>().is_err());
    }

    #[test]
    fn test_line_count_counts_the_line_after_a_final_newline() {
        assert_eq!(line_count(""), 0);
        assert_eq!(line_count("x = 1"), 1);
        assert_eq!(line_count("x = 1\n"), 2);
        assert_eq!(line_count("a\r\nb\r\n"), 3);

        let packed = pack_repository("repo", ".", inputs(), &PackConfig::default()).unwrap();
        assert!(packed.files.iter().all(|f| f.line_count == 3));
    }

    #[test]
    fn test_pack_orders_files_by_path() {
        let packed = pack_repository("repo", ".", inputs(), &PackConfig::default()).unwrap();
        let paths: Vec<&str> = packed.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py"]);
    }

    #[test]
    fn test_auto_layout_without_sharing_is_full() {
        let packed = pack_repository("repo", ".", inputs(), &PackConfig::default()).unwrap();
        assert_eq!(packed.layout, Layout::Full);
        assert!(packed.library.is_empty());
        assert!(packed.files.iter().all(|f| f.stub.is_none()));
        assert!(
            packed
                .files
                .iter()
                .flat_map(|f| &f.defs)
                .all(|d| !d.has_marker)
        );
    }

    #[test]
    fn test_parse_skipped_file_is_kept() {
        let files = vec![FileInput::new("bad.py", "def broken(:\n")];
        let packed = pack_repository("repo", ".", files, &PackConfig::default()).unwrap();
        assert_eq!(packed.report.parse_skipped, vec!["bad.py".to_string()]);
        assert_eq!(packed.files.len(), 1);
        assert!(packed.files[0].defs.is_empty());
    }

    #[test]
    fn test_per_file_budget_skips_and_records() {
        let config = PackConfig {
            budgets: BudgetLimits {
                max_file_bytes: 8,
                ..Default::default()
            },
            ..Default::default()
        };
        let files = vec![
            FileInput::new("small.py", "x = 1\n"),
            FileInput::new("large.py", "y = 1234567890\n"),
        ];
        let packed = pack_repository("repo", ".", files, &config).unwrap();
        assert_eq!(packed.report.budget_skipped, vec!["large.py".to_string()]);
        assert_eq!(packed.files.len(), 1);
    }

    #[test]
    fn test_worker_pool_preserves_order_across_calls() {
        let pool = WorkerPool::new(3);
        for round in 0..3usize {
            let items: Vec<usize> = (0..100).collect();
            let doubled = pool.map(items, |i| i * 2 + round);
            assert_eq!(doubled, (0..100).map(|i| i * 2 + round).collect::<Vec<_>>());
        }
        assert!(pool.map(Vec::<usize>::new(), |i| i).is_empty());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let repos = vec![
            ("app".to_string(), "a".to_string(), inputs()),
            ("app".to_string(), "b".to_string(), inputs()),
        ];
        let err = pack_repositories(repos, &PackConfig::default()).unwrap_err();
        assert!(err.to_string().contains("Duplicate repository label"));
    }
}
