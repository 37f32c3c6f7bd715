// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

//! Size and token budgets for a pack operation.
//!
//! Per-file limits skip the offending file and the run continues. Total
//! limits abort the whole operation. Totals are accumulated in path order so
//! the outcome does not depend on worker scheduling.
//!
//! # Example
//!
//! ```
//! use codecrate::packer::budget::{BudgetLimits, BudgetTracker};
//!
//! let limits = BudgetLimits { max_file_bytes: 10, ..Default::default() };
//! let mut tracker = BudgetTracker::new(limits).unwrap();
//! assert!(tracker.admit("small.py", "x = 1\n").is_ok());
//! assert!(tracker.admit("big.py", "x = 1234567890\n").is_err());
//! ```

use serde::{Deserialize, Serialize};
use tiktoken_rs::cl100k_base;

use crate::utils::error::{BudgetScope, CodecrateError};

/// Trait for counting tokens in text.
pub trait Tokenizer: Send + Sync {
    fn count_tokens(&self, text: &str) -> usize;
}

/// Tokenizer backed by tiktoken's `cl100k_base` encoding.
pub struct TiktokenTokenizer {
    encoding: tiktoken_rs::CoreBPE,
}

impl TiktokenTokenizer {
    /// # Errors
    ///
    /// Returns an error if the encoding cannot be loaded.
    pub fn new() -> Result<Self, CodecrateError> {
        let encoding = cl100k_base().map_err(|e| CodecrateError::Config(e.to_string()))?;
        Ok(Self { encoding })
    }
}

impl Tokenizer for TiktokenTokenizer {
    fn count_tokens(&self, text: &str) -> usize {
        self.encoding.encode_with_special_tokens(text).len()
    }
}

/// Configured limits. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetLimits {
    #[serde(default)]
    pub max_file_bytes: usize,
    #[serde(default)]
    pub max_file_tokens: usize,
    #[serde(default)]
    pub max_total_bytes: usize,
    #[serde(default)]
    pub max_total_tokens: usize,
}

impl BudgetLimits {
    pub fn counts_tokens(&self) -> bool {
        self.max_file_tokens > 0 || self.max_total_tokens > 0
    }

    pub fn is_unlimited(&self) -> bool {
        *self == Self::default()
    }
}

/// Running totals for one pack operation.
pub struct BudgetTracker {
    limits: BudgetLimits,
    tokenizer: Option<Box<dyn Tokenizer>>,
    total_bytes: usize,
    total_tokens: usize,
}

impl BudgetTracker {
    /// The tokenizer is only loaded when a token limit is configured.
    pub fn new(limits: BudgetLimits) -> Result<Self, CodecrateError> {
        let tokenizer: Option<Box<dyn Tokenizer>> = if limits.counts_tokens() {
            Some(Box::new(TiktokenTokenizer::new()?))
        } else {
            None
        };
        Ok(Self {
            limits,
            tokenizer,
            total_bytes: 0,
            total_tokens: 0,
        })
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn total_tokens(&self) -> usize {
        self.total_tokens
    }

    /// Account for one file.
    ///
    /// A per-file violation returns `BudgetExceeded` with `BudgetScope::File`
    /// and leaves the totals untouched. A total violation returns
    /// `BudgetScope::Total`.
    pub fn admit(&mut self, path: &str, text: &str) -> Result<(), CodecrateError> {
        let bytes = text.len();
        let tokens = self
            .tokenizer
            .as_ref()
            .map(|t| t.count_tokens(text))
            .unwrap_or(0);

        check(BudgetScope::File, "bytes", self.limits.max_file_bytes, bytes, Some(path))?;
        check(BudgetScope::File, "tokens", self.limits.max_file_tokens, tokens, Some(path))?;

        let next_bytes = self.total_bytes + bytes;
        let next_tokens = self.total_tokens + tokens;
        check(BudgetScope::Total, "bytes", self.limits.max_total_bytes, next_bytes, None)?;
        check(BudgetScope::Total, "tokens", self.limits.max_total_tokens, next_tokens, None)?;

        self.total_bytes = next_bytes;
        self.total_tokens = next_tokens;
        Ok(())
    }
}

fn check(
    scope: BudgetScope,
    unit: &'static str,
    limit: usize,
    actual: usize,
    path: Option<&str>,
) -> Result<(), CodecrateError> {
    if limit > 0 && actual > limit {
        return Err(CodecrateError::BudgetExceeded {
            scope,
            unit,
            limit,
            actual,
            path: path.map(str::to_string),
        });
    }
    Ok(())
}
