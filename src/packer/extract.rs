// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

//! Definition extraction.
//!
//! Python is the primary language and is parsed structurally with
//! tree-sitter-python: functions, methods and classes are extracted with
//! exact line spans, decorators and docstrings, and top-level function bodies
//! become stub candidates. Other languages go through an optional
//! grammar-backed strategy that only indexes symbols; their files are always
//! packed verbatim.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

use super::canonical::stable_location_id;
use super::{Definition, DefinitionKind};
use crate::utils::error::CodecrateError;

/// Languages the extractor knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    TypeScript,
    Tsx,
    JavaScript,
    Rust,
    Go,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::JavaScript => "javascript",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }
}

/// Detect the source language from a file extension.
pub fn detect_language(path: &Path) -> Option<Language> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| match ext.to_ascii_lowercase().as_str() {
            "py" => Some(Language::Python),
            "ts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "js" | "jsx" => Some(Language::JavaScript),
            "rs" => Some(Language::Rust),
            "go" => Some(Language::Go),
            _ => None,
        })
}

/// Backend selection for non-primary languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SymbolBackend {
    /// Use the grammar backend when it is compiled in
    #[default]
    Auto,
    /// Same as auto, named explicitly
    TreeSitter,
    /// Never extract symbols from non-primary languages
    None,
}

impl std::str::FromStr for SymbolBackend {
    type Err = CodecrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "tree-sitter" | "treesitter" => Ok(Self::TreeSitter),
            "none" | "python" => Ok(Self::None),
            other => Err(CodecrateError::Config(format!(
                "Unknown symbol backend '{}' (expected auto, tree-sitter or none)",
                other
            ))),
        }
    }
}

/// One extraction strategy. Implementations are stateless and safe to share
/// across the worker pool.
pub trait DefinitionExtractor: Send + Sync {
    /// Short name reported in debug logs.
    fn name(&self) -> &'static str;

    /// Extract definitions ordered by source position.
    ///
    /// Returns `CodecrateError::ParseSkipped` when the text cannot be
    /// understood; the caller keeps the file verbatim.
    fn extract(
        &self,
        path: &str,
        module: &str,
        source: &str,
    ) -> Result<Vec<Definition>, CodecrateError>;
}

/// Pick the extraction strategy for a file.
pub fn extractor_for(path: &str, backend: SymbolBackend) -> Box<dyn DefinitionExtractor> {
    match detect_language(Path::new(path)) {
        Some(Language::Python) => Box::new(PythonExtractor),
        Some(language) if backend != SymbolBackend::None => {
            Box::new(GrammarExtractor::new(language))
        }
        _ => Box::new(NoopExtractor),
    }
}

/// Dotted module name for a packed path.
///
/// Python paths drop a leading `src/`, the `.py` suffix and a trailing
/// `__init__`. Other files use their dotted path without extension.
pub fn module_name_for(path: &str) -> String {
    let mut parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let is_python = path.to_ascii_lowercase().ends_with(".py");

    if is_python {
        if parts.first() == Some(&"src") && parts.len() > 1 {
            parts.remove(0);
        }
        let mut owned: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
        if let Some(last) = owned.last_mut() {
            if let Some(stem) = last.strip_suffix(".py") {
                *last = stem.to_string();
            }
        }
        if owned.last().map(String::as_str) == Some("__init__") {
            owned.pop();
        }
        return owned.join(".");
    }

    let mut owned: Vec<String> = parts.iter().map(|p| (*p).to_string()).collect();
    if let Some(last) = owned.last_mut() {
        if let Some((stem, _)) = last.rsplit_once('.') {
            if !stem.is_empty() {
                *last = stem.to_string();
            }
        }
    }
    owned.join(".")
}

/// Extracts nothing; used for unknown languages and the `none` backend.
pub struct NoopExtractor;

impl DefinitionExtractor for NoopExtractor {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extract(&self, _: &str, _: &str, _: &str) -> Result<Vec<Definition>, CodecrateError> {
        Ok(Vec::new())
    }
}

/// Structural parser for Python sources.
pub struct PythonExtractor;

/// Scope entry while walking the syntax tree.
struct Scope {
    name: String,
    is_class: bool,
}

impl DefinitionExtractor for PythonExtractor {
    fn name(&self) -> &'static str {
        "python"
    }

    fn extract(
        &self,
        path: &str,
        module: &str,
        source: &str,
    ) -> Result<Vec<Definition>, CodecrateError> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| CodecrateError::ParseSkipped {
                path: path.to_string(),
                reason: format!("python grammar unavailable: {}", e),
            })?;

        let tree = parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| CodecrateError::ParseSkipped {
                path: path.to_string(),
                reason: "parser returned no tree".to_string(),
            })?;

        let root = tree.root_node();
        if root.has_error() {
            return Err(CodecrateError::ParseSkipped {
                path: path.to_string(),
                reason: "syntax error".to_string(),
            });
        }

        let lines: Vec<&str> = source.split_inclusive('\n').collect();
        let mut walker = PythonWalker {
            path,
            module,
            source,
            lines: &lines,
            scopes: Vec::new(),
            function_depth: 0,
            defs: Vec::new(),
        };
        walker.visit_children(root, None);

        let mut defs = walker.defs;
        defs.sort_by(|a, b| {
            (a.def_line, a.end_line, &a.qualname).cmp(&(b.def_line, b.end_line, &b.qualname))
        });
        Ok(defs)
    }
}

struct PythonWalker<'a> {
    path: &'a str,
    module: &'a str,
    source: &'a str,
    lines: &'a [&'a str],
    scopes: Vec<Scope>,
    function_depth: usize,
    defs: Vec<Definition>,
}

impl PythonWalker<'_> {
    fn visit_children(&mut self, node: Node<'_>, decorated_start: Option<usize>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child, decorated_start);
        }
    }

    fn visit(&mut self, node: Node<'_>, decorated_start: Option<usize>) {
        match node.kind() {
            "decorated_definition" => {
                let start_row = node.start_position().row;
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.visit(definition, Some(start_row));
                }
            }
            "function_definition" => {
                let name = self.node_text(node.child_by_field_name("name"));
                self.add(node, &name, decorated_start, false);
                self.scopes.push(Scope {
                    name,
                    is_class: false,
                });
                self.function_depth += 1;
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_children(body, None);
                }
                self.function_depth -= 1;
                self.scopes.pop();
            }
            "class_definition" => {
                let name = self.node_text(node.child_by_field_name("name"));
                self.add(node, &name, decorated_start, true);
                self.scopes.push(Scope {
                    name,
                    is_class: true,
                });
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_children(body, None);
                }
                self.scopes.pop();
            }
            _ => self.visit_children(node, None),
        }
    }

    fn node_text(&self, node: Option<Node<'_>>) -> String {
        node.and_then(|n| n.utf8_text(self.source.as_bytes()).ok())
            .map(str::to_string)
            .unwrap_or_else(|| "<anon>".to_string())
    }

    fn add(&mut self, node: Node<'_>, name: &str, decorated_start: Option<usize>, is_class: bool) {
        let qualname = if self.scopes.is_empty() {
            name.to_string()
        } else {
            let mut parts: Vec<&str> = self.scopes.iter().map(|s| s.name.as_str()).collect();
            parts.push(name);
            parts.join(".")
        };

        let kind = if is_class {
            DefinitionKind::Class
        } else if self.scopes.last().is_some_and(|s| s.is_class) {
            DefinitionKind::Method
        } else {
            DefinitionKind::Function
        };

        let def_row = node.start_position().row;
        let end_row = node_end_row(node);
        let decorator_row = decorated_start.unwrap_or(def_row).min(def_row);

        let mut body_row = end_row;
        let mut body_column = 0;
        let mut doc_rows = None;
        if let Some(body) = node.child_by_field_name("body") {
            body_row = body.start_position().row;
            body_column = body.start_position().column;
            doc_rows = docstring_rows(body);
        }

        let inline_body = self
            .lines
            .get(body_row)
            .and_then(|line| line.get(..body_column))
            .is_some_and(|prefix| !prefix.trim().is_empty());
        if inline_body {
            doc_rows = None;
        }

        let def_line = def_row + 1;
        let local_id = stable_location_id(self.path, &qualname, def_line);
        self.defs.push(Definition {
            path: self.path.to_string(),
            module: self.module.to_string(),
            qualname,
            kind,
            decorator_start: decorator_row + 1,
            def_line,
            body_start: body_row + 1,
            body_column: if inline_body { Some(body_column) } else { None },
            end_line: end_row + 1,
            doc_start: doc_rows.map(|(s, _)| s + 1),
            doc_end: doc_rows.map(|(_, e)| e + 1),
            has_marker: !is_class && self.function_depth == 0,
            local_id: local_id.clone(),
            canonical_id: local_id,
        });
    }
}

/// Last row covered by a node, ignoring a trailing newline it may consume.
fn node_end_row(node: Node<'_>) -> usize {
    let start = node.start_position();
    let end = node.end_position();
    if end.column == 0 && end.row > start.row {
        end.row - 1
    } else {
        end.row
    }
}

/// Rows of a leading docstring in a block, if any.
fn docstring_rows(body: Node<'_>) -> Option<(usize, usize)> {
    let mut cursor = body.walk();
    let first = body
        .named_children(&mut cursor)
        .find(|child| child.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if !matches!(expr.kind(), "string" | "concatenated_string") {
        return None;
    }
    // A docstring that shares its last line with another statement is not
    // kept separately.
    let end_row = node_end_row(first);
    if let Some(next) = first.next_named_sibling() {
        if next.start_position().row == end_row {
            return None;
        }
    }
    Some((first.start_position().row, end_row))
}

/// Grammar-backed, index-only symbol extraction.
pub struct GrammarExtractor {
    language: Language,
}

impl GrammarExtractor {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    fn grammar(&self) -> Option<tree_sitter::Language> {
        match self.language {
            #[cfg(feature = "lang-typescript")]
            Language::TypeScript | Language::JavaScript => {
                Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            }
            #[cfg(feature = "lang-typescript")]
            Language::Tsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            #[cfg(feature = "lang-rust")]
            Language::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-go")]
            Language::Go => Some(tree_sitter_go::LANGUAGE.into()),
            _ => None,
        }
    }

    fn symbol_kind(&self, node_kind: &str) -> Option<DefinitionKind> {
        match self.language {
            Language::TypeScript | Language::Tsx | Language::JavaScript => match node_kind {
                "function_declaration" => Some(DefinitionKind::Function),
                "class_declaration" => Some(DefinitionKind::Class),
                "method_definition" => Some(DefinitionKind::Method),
                _ => None,
            },
            Language::Go => match node_kind {
                "function_declaration" => Some(DefinitionKind::Function),
                "method_declaration" => Some(DefinitionKind::Method),
                "type_declaration" => Some(DefinitionKind::Type),
                _ => None,
            },
            Language::Rust => match node_kind {
                "function_item" => Some(DefinitionKind::Function),
                "struct_item" | "enum_item" | "trait_item" => Some(DefinitionKind::Type),
                _ => None,
            },
            Language::Python => None,
        }
    }
}

impl DefinitionExtractor for GrammarExtractor {
    fn name(&self) -> &'static str {
        "tree-sitter"
    }

    fn extract(
        &self,
        path: &str,
        module: &str,
        source: &str,
    ) -> Result<Vec<Definition>, CodecrateError> {
        let Some(grammar) = self.grammar() else {
            tracing::trace!(
                path,
                language = self.language.as_str(),
                "grammar not compiled in"
            );
            return Ok(Vec::new());
        };

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| CodecrateError::ParseSkipped {
                path: path.to_string(),
                reason: format!("{} grammar unavailable: {}", self.language.as_str(), e),
            })?;
        let tree = parser
            .parse(source.as_bytes(), None)
            .ok_or_else(|| CodecrateError::ParseSkipped {
                path: path.to_string(),
                reason: "parser returned no tree".to_string(),
            })?;

        let mut defs = Vec::new();
        let mut stack = vec![tree.root_node()];
        while let Some(node) = stack.pop() {
            let mut cursor = node.walk();
            let mut children: Vec<Node<'_>> = node.children(&mut cursor).collect();
            children.reverse();
            stack.extend(children);

            let Some(kind) = self.symbol_kind(node.kind()) else {
                continue;
            };
            let Some(name) = grammar_node_name(source, node) else {
                continue;
            };

            let start_row = node.start_position().row;
            let end_row = node_end_row(node);
            let local_id =
                stable_location_id(path, &format!("{}:{}", kind.as_str(), name), start_row + 1);
            defs.push(Definition {
                path: path.to_string(),
                module: module.to_string(),
                qualname: name,
                kind,
                decorator_start: start_row + 1,
                def_line: start_row + 1,
                body_start: (start_row + 2).min(end_row + 1),
                body_column: None,
                end_line: end_row + 1,
                doc_start: None,
                doc_end: None,
                has_marker: false,
                local_id: local_id.clone(),
                canonical_id: local_id,
            });
        }

        defs.sort_by(|a, b| (a.def_line, &a.qualname).cmp(&(b.def_line, &b.qualname)));
        Ok(defs)
    }
}

fn grammar_node_name(source: &str, node: Node<'_>) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        let text = name.utf8_text(source.as_bytes()).ok()?.trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find(|child| {
        matches!(
            child.kind(),
            "identifier" | "property_identifier" | "type_identifier" | "field_identifier"
        )
    });
    found
        .and_then(|child| child.utf8_text(source.as_bytes()).ok())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}
