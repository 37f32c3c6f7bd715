use std::path::PathBuf;
use thiserror::Error;

use crate::output::MISSING_MANIFEST_HINT;

/// Whether a budget applies to a single file or to the whole operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetScope {
    /// Per-file limit; the file is skipped and the run continues
    File,
    /// Whole-operation limit; the run aborts
    Total,
}

impl std::fmt::Display for BudgetScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "per-file"),
            Self::Total => write!(f, "total"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("Parse skipped for {path}: {reason}")]
    ParseSkipped { path: String, reason: String },

    #[error("Integrity mismatch for {path}: expected sha256 {expected}, got {actual}")]
    IntegrityMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Unresolved marker in {path}: missing canonical source for id={id}")]
    UnresolvedMarker { path: String, id: String },

    #[error("Identifier collision for id={id}: {first} and {second} have different bodies")]
    IdentifierCollision {
        id: String,
        first: String,
        second: String,
    },

    #[error("Baseline conflict for {path}: baseline does not match (expected {expected}, got {actual})")]
    BaselineConflict {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Hunk conflict in {path}: {hunk}: {message}")]
    HunkConflict {
        path: String,
        hunk: String,
        message: String,
    },

    #[error("{scope} budget exceeded{}: {actual} > {limit} {unit}", path.as_ref().map(|p| format!(" for {p}")).unwrap_or_default())]
    BudgetExceeded {
        scope: BudgetScope,
        unit: &'static str,
        limit: usize,
        actual: usize,
        path: Option<String>,
    },

    #[error("{}", MISSING_MANIFEST_HINT)]
    MissingManifest,

    #[error("Refusing unsafe path '{path}': {reason}")]
    UnsafePath { path: String, reason: String },

    #[error("Failed to decode UTF-8 in {}", path.display())]
    Encoding { path: PathBuf },

    #[error("Parse error: {message}")]
    ParseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}\nSuggestion: {suggestion}")]
    ValidationError { message: String, suggestion: String },
}

impl CodecrateError {
    pub fn parse(message: impl Into<String>) -> Self {
        CodecrateError::ParseError {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_layout(layout: &str) -> Self {
        CodecrateError::ValidationError {
            message: format!("Invalid layout: '{}'", layout),
            suggestion: "Valid layouts are: auto, stubs, full".to_string(),
        }
    }

    pub fn invalid_encoding_policy(policy: &str) -> Self {
        CodecrateError::ValidationError {
            message: format!("Invalid encoding_errors policy: '{}'", policy),
            suggestion: "Valid policies are: replace, strict".to_string(),
        }
    }

    /// True for conditions that are recovered per file instead of aborting.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            CodecrateError::ParseSkipped { .. }
                | CodecrateError::BudgetExceeded {
                    scope: BudgetScope::File,
                    ..
                }
        )
    }
}

impl From<serde_json::Error> for CodecrateError {
    fn from(err: serde_json::Error) -> Self {
        CodecrateError::ParseError {
            message: "Failed to parse embedded JSON block".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for CodecrateError {
    fn from(err: toml::de::Error) -> Self {
        CodecrateError::ParseError {
            message: "Failed to parse TOML configuration".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// Render an error for terminal display.
///
/// In verbose mode the source chain is appended.
pub fn format_error(error: &CodecrateError, verbose: bool) -> String {
    let mut out = format!("\n\u{26a0} Error: {}", error);

    if let CodecrateError::BaselineConflict { .. } = error {
        out.push_str("\n\nRe-run `codecrate patch` against the current baseline, or pass --check-baseline ignore.");
    }

    if verbose {
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            out.push_str(&format!("\n  caused by: {}", cause));
            source = cause.source();
        }
    }
    out
}
