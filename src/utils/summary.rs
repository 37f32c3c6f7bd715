// Copyright (c) 2025-2026 the codecrate contributors
// SPDX-License-Identifier: Apache-2.0

//! Terminal summaries for completed operations.
//!
//! Every function here is a no-op in quiet mode and writes to stdout
//! through `console`, so styling is dropped automatically when stdout is
//! not a terminal.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use console::{Term, style};

use crate::output::writer::OutputResult;
use crate::packer::PackedRepo;
use crate::patch::ApplyReport;
use crate::patch::apply::FileAction;
use crate::patch::document::PatchDocument;
use crate::unpack::UnpackReport;
use crate::utils::formatting::{format_number, format_size, plural};

const BRANCH: &str = "\u{251c}\u{2500}";
const LAST: &str = "\u{2514}\u{2500}";

fn header(term: &mut Term, title: &str) -> Result<()> {
    writeln!(term)?;
    writeln!(
        term,
        "{} {}",
        style("\u{2713}").green().bold(),
        style(title).bold()
    )?;
    Ok(())
}

fn tree_line(term: &mut Term, last: bool, text: &str) -> Result<()> {
    let prefix = if last { LAST } else { BRANCH };
    writeln!(term, "{} {}", style(prefix).dim(), text)?;
    Ok(())
}

/// Display the result of a pack run.
pub fn display_pack_summary(repos: &[PackedRepo], output: &OutputResult, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }
    let mut term = Term::stdout();
    header(&mut term, "Pack written")?;

    writeln!(term)?;
    writeln!(term, "{}:", style("Output Files").bold())?;
    for (i, path) in output.paths.iter().enumerate() {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        tree_line(
            &mut term,
            i + 1 == output.paths.len(),
            &format!("{} ({})", path.display(), format_size(size)),
        )?;
    }

    for repo in repos {
        let report = &repo.report;
        writeln!(term)?;
        writeln!(term, "{} '{}':", style("Repository").bold(), repo.label)?;
        tree_line(&mut term, false, &format!("Files packed: {}", format_number(report.files_packed)))?;
        tree_line(&mut term, false, &format!("Definitions: {}", format_number(report.definitions)))?;
        tree_line(&mut term, false, &format!("Layout: {}", repo.layout))?;
        tree_line(
            &mut term,
            false,
            &format!("Library entries: {}", format_number(report.library_entries)),
        )?;
        if report.total_tokens > 0 {
            tree_line(&mut term, false, &format!("Tokens: {}", format_number(report.total_tokens)))?;
        }
        let skipped = report.parse_skipped.len() + report.budget_skipped.len();
        tree_line(
            &mut term,
            true,
            &format!(
                "Size: {}, skipped: {}",
                format_size(report.total_bytes as u64),
                skipped
            ),
        )?;
        for path in &report.parse_skipped {
            writeln!(term, "   {} parse skipped: {}", style("\u{26a0}").yellow(), path)?;
        }
        for path in &report.budget_skipped {
            writeln!(term, "   {} over budget: {}", style("\u{26a0}").yellow(), path)?;
        }
    }
    writeln!(term)?;
    Ok(())
}

/// Display the result of an unpack run.
pub fn display_unpack_summary(report: &UnpackReport, out_dir: &Path, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }
    let mut term = Term::stdout();
    header(&mut term, "Unpacked")?;
    tree_line(
        &mut term,
        report.unresolved_markers == 0,
        &format!("{} written to {}", plural(report.written.len(), "file"), out_dir.display()),
    )?;
    if report.unresolved_markers > 0 {
        tree_line(
            &mut term,
            true,
            &format!(
                "{} {}",
                style("\u{26a0}").yellow(),
                plural(report.unresolved_markers, "unresolved marker")
            ),
        )?;
    }
    writeln!(term)?;
    Ok(())
}

/// Display the result of a patch run.
pub fn display_patch_summary(patch: &PatchDocument, output: &Path, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }
    let mut term = Term::stdout();
    if patch.is_empty() {
        writeln!(term, "No changes against the baseline.")?;
        return Ok(());
    }
    header(&mut term, "Patch written")?;
    let files: Vec<_> = patch.sections.iter().flat_map(|s| &s.files).collect();
    for (i, file) in files.iter().enumerate() {
        tree_line(
            &mut term,
            i + 1 == files.len(),
            &format!("{:?} {} ({})", file.op, file.path, plural(file.hunks.len(), "hunk")),
        )?;
    }
    writeln!(term, "Saved to {}", output.display())?;
    Ok(())
}

/// Display the result of an apply run.
pub fn display_apply_summary(report: &ApplyReport, quiet: bool) -> Result<()> {
    if quiet {
        return Ok(());
    }
    let mut term = Term::stdout();
    let title = if report.dry_run {
        "Dry run: patch applies"
    } else {
        "Patch applied"
    };
    header(&mut term, title)?;
    for (i, (path, action)) in report.changed.iter().enumerate() {
        let verb = match action {
            FileAction::Created => "created",
            FileAction::Modified => "modified",
            FileAction::Deleted => "deleted",
        };
        tree_line(
            &mut term,
            i + 1 == report.changed.len(),
            &format!("{} {}", verb, path.display()),
        )?;
    }
    for conflict in &report.conflicts {
        writeln!(term, "{} {}", style("\u{2717}").red(), conflict)?;
    }
    writeln!(term)?;
    Ok(())
}
