//! Pack document rendering and writing.
//!
//! This module handles the output stage of a pack:
//! - Rendering repository sections into one markdown document
//! - Splitting oversized documents into ordered part files
//! - Writing documents atomically

use std::io::Write;
use std::path::{Path, PathBuf};

use super::fence::{fenced_block, is_fence_close, parse_fence_open};
use super::manifest::{MachineHeader, Manifest};
use super::{
    FENCE_MACHINE_HEADER, FENCE_MANIFEST, PACK_TITLE, REPOSITORY_HEADING, SECTION_FILES,
    SECTION_INDEX, SECTION_LIBRARY, SECTION_MACHINE_HEADER, SECTION_MANIFEST,
};
use crate::packer::extract::detect_language;
use crate::packer::{Layout, PackedRepo};
use crate::utils::error::CodecrateError;

/// Options for controlling pack rendering and writing.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    /// Emit machine header and manifest blocks
    pub manifest: bool,
    /// Emit the symbol index view
    pub index: bool,
    /// Maximum characters per part; 0 keeps a single document
    pub split_max_chars: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            manifest: true,
            index: true,
            split_max_chars: 0,
        }
    }
}

impl WriteOptions {
    /// Set whether to emit the manifest.
    pub fn with_manifest(mut self, manifest: bool) -> Self {
        self.manifest = manifest;
        self
    }

    /// Set the split size.
    pub fn with_split_max_chars(mut self, split_max_chars: usize) -> Self {
        self.split_max_chars = split_max_chars;
        self
    }
}

/// Result of writing a document.
#[derive(Debug, Clone)]
pub struct OutputResult {
    /// All written paths, primary first
    pub paths: Vec<PathBuf>,
    /// Total bytes written
    pub bytes: usize,
    /// Whether the primary file was newly created (vs overwritten)
    pub is_new: bool,
}

/// Info string used for a file block.
fn info_string(path: &str) -> &'static str {
    detect_language(Path::new(path))
        .map(|l| l.as_str())
        .unwrap_or("text")
}

/// Render the body of one repository section (everything under its title).
fn render_section(repo: &PackedRepo, options: &WriteOptions) -> Result<String, CodecrateError> {
    let mut out = String::new();
    out.push_str(&format!("Root: `{}`\n\n", repo.root));

    if options.manifest {
        let manifest = Manifest::from_repo(repo);
        let header = MachineHeader::new(&manifest, &repo.label, &repo.slug)?;
        out.push_str(SECTION_MACHINE_HEADER);
        out.push_str("\n\n");
        out.push_str(&fenced_block(
            FENCE_MACHINE_HEADER,
            &serde_json::to_string(&header)?,
        ));
        out.push('\n');
        out.push_str(SECTION_MANIFEST);
        out.push_str("\n\n");
        out.push_str(&fenced_block(FENCE_MANIFEST, &manifest.to_pretty_json()?));
        out.push('\n');
    }

    if options.index && repo.files.iter().any(|f| !f.defs.is_empty()) {
        out.push_str(SECTION_INDEX);
        out.push_str("\n\n");
        for file in repo.files.iter().filter(|f| !f.defs.is_empty()) {
            out.push_str(&format!("### `{}`\n\n", file.path));
            for def in &file.defs {
                out.push_str(&format!(
                    "- `{}.{}` ({}) \u{2192} **{}** (L{}-L{})\n",
                    def.module,
                    def.qualname,
                    def.kind.as_str(),
                    def.canonical_id,
                    def.def_line,
                    def.end_line
                ));
            }
            out.push('\n');
        }
    }

    if repo.layout == Layout::Stubs && !repo.library.is_empty() {
        out.push_str(SECTION_LIBRARY);
        out.push_str("\n\n");
        for entry in &repo.library {
            out.push_str(&format!("### {}\n\n", entry.id));
            out.push_str(&fenced_block("python", &entry.text));
            out.push('\n');
        }
    }

    out.push_str(SECTION_FILES);
    out.push_str("\n\n");
    for file in &repo.files {
        out.push_str(&format!("### `{}`\n\n", file.path));
        out.push_str(&fenced_block(info_string(&file.path), file.emitted_text()));
        out.push('\n');
    }
    Ok(out)
}

/// Render a complete pack document.
///
/// A single section is written without a repository heading; several
/// sections each get `# Repository: <label>`.
pub fn render_pack(repos: &[PackedRepo], options: &WriteOptions) -> Result<String, CodecrateError> {
    let mut out = String::new();
    out.push_str(PACK_TITLE);
    out.push_str("\n\n");

    match repos {
        [single] => out.push_str(&render_section(single, options)?),
        _ => {
            for repo in repos {
                out.push_str(&format!("{} {}\n\n", REPOSITORY_HEADING, repo.label));
                out.push_str(&render_section(repo, options)?);
            }
        }
    }
    Ok(out)
}

/// True for lines before which a part boundary may fall.
fn is_split_point(line: &str) -> bool {
    line.starts_with("### ") || line.starts_with(REPOSITORY_HEADING)
}

/// Split a document into parts of at most `max_chars` characters.
///
/// Cuts only fall before `###` or repository headings outside fences, and
/// never before a section's file or library entries have started, so a
/// section's header and manifest stay with the part where it begins. A
/// single block larger than the limit gets a part of its own. Concatenating
/// the parts yields the input.
pub fn split_document(text: &str, max_chars: usize) -> Vec<String> {
    if max_chars == 0 || text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut fence: Option<String> = None;
    let mut in_entries = false;

    for line in text.split_inclusive('\n') {
        match &fence {
            Some(open) => {
                if is_fence_close(line, open) {
                    fence = None;
                }
            }
            None => {
                if let Some((open, _)) = parse_fence_open(line) {
                    fence = Some(open);
                } else {
                    let heading = line.trim_end();
                    if heading == SECTION_FILES || heading == SECTION_LIBRARY {
                        in_entries = true;
                    } else if heading.starts_with(REPOSITORY_HEADING) {
                        in_entries = false;
                    }
                    let cut = is_split_point(line)
                        && (in_entries || line.starts_with(REPOSITORY_HEADING));
                    if cut && !current.is_empty() {
                        chunks.push(std::mem::take(&mut current));
                    }
                }
            }
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    let mut parts: Vec<String> = Vec::new();
    let mut part = String::new();
    let mut part_chars = 0usize;
    for chunk in chunks {
        let chunk_chars = chunk.chars().count();
        if !part.is_empty() && part_chars + chunk_chars > max_chars {
            parts.push(std::mem::take(&mut part));
            part_chars = 0;
        }
        part.push_str(&chunk);
        part_chars += chunk_chars;
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

/// Path of part `n` (2-based) next to the primary document.
pub fn part_path(primary: &Path, n: usize) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match primary.extension() {
        Some(ext) => format!("{}.part{}.{}", stem, n, ext.to_string_lossy()),
        None => format!("{}.part{}", stem, n),
    };
    primary.with_file_name(name)
}

/// Write bytes to `path` through a temporary file in the same directory.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CodecrateError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(&parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.persist(path).map_err(|e| {
        CodecrateError::FileSystem(std::io::Error::new(
            e.error.kind(),
            format!("Failed to write {}: {}", path.display(), e.error),
        ))
    })?;
    Ok(())
}

/// Render, split and write a pack document.
///
/// Part files left over from an earlier, larger run are removed so readers
/// joining siblings do not pick them up.
pub fn write_pack(
    repos: &[PackedRepo],
    output: &Path,
    options: &WriteOptions,
) -> Result<OutputResult, CodecrateError> {
    let document = render_pack(repos, options)?;
    let parts = split_document(&document, options.split_max_chars);
    let is_new = !output.exists();

    let mut paths = Vec::with_capacity(parts.len());
    for (idx, part) in parts.iter().enumerate() {
        let path = if idx == 0 {
            output.to_path_buf()
        } else {
            part_path(output, idx + 1)
        };
        write_atomic(&path, part.as_bytes())?;
        tracing::debug!(path = %path.display(), chars = part.len(), "wrote pack part");
        paths.push(path);
    }

    let mut stale = parts.len() + 1;
    loop {
        let path = part_path(output, stale);
        if !path.exists() {
            break;
        }
        std::fs::remove_file(&path)?;
        tracing::debug!(path = %path.display(), "removed stale part");
        stale += 1;
    }

    tracing::info!(
        "Wrote pack to {} ({} part(s))",
        output.display(),
        paths.len()
    );
    Ok(OutputResult {
        paths,
        bytes: document.len(),
        is_new,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packer::{FileInput, PackConfig, pack_repository};
    use std::fs;
    use tempfile::TempDir;

    fn repo(files: Vec<FileInput>, config: &PackConfig) -> PackedRepo {
        let mut packed = pack_repository("demo", ".", files, config).unwrap();
        packed.slug = "demo".to_string();
        packed
    }

    #[test]
    fn test_render_full_layout_has_no_library() {
        let packed = repo(
            vec![FileInput::new("a.py", "def f():\n    return 1\n")],
            &PackConfig::default(),
        );
        let doc = render_pack(&[packed], &WriteOptions::default()).unwrap();
        assert!(doc.starts_with("# Codecrate Context Pack\n\nRoot: `.`\n"));
        assert!(doc.contains("```codecrate-machine-header\n"));
        assert!(doc.contains("```codecrate-manifest\n"));
        assert!(!doc.contains(SECTION_LIBRARY));
        assert!(doc.contains("### `a.py`\n\n```python\ndef f():\n    return 1\n```\n"));
    }

    #[test]
    fn test_render_without_manifest() {
        let packed = repo(vec![FileInput::new("a.py", "x = 1\n")], &PackConfig::default());
        let doc = render_pack(&[packed], &WriteOptions::default().with_manifest(false)).unwrap();
        assert!(!doc.contains(FENCE_MANIFEST));
        assert!(!doc.contains(FENCE_MACHINE_HEADER));
    }

    #[test]
    fn test_split_concatenates_back() {
        let files: Vec<FileInput> = (0..6)
            .map(|i| FileInput::new(format!("m{}.py", i), format!("VALUE_{} = {}\n", i, i)))
            .collect();
        let packed = repo(files, &PackConfig::default());
        let doc = render_pack(&[packed], &WriteOptions::default()).unwrap();
        let parts = split_document(&doc, 400);
        assert!(parts.len() > 1);
        assert_eq!(parts.concat(), doc);
        assert!(parts[0].contains(FENCE_MANIFEST));
        for part in &parts[1..] {
            assert!(part.starts_with("### `"));
        }
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("out/context.md"), 2),
            PathBuf::from("out/context.part2.md")
        );
        assert_eq!(part_path(Path::new("pack"), 3), PathBuf::from("pack.part3"));
    }

    #[test]
    fn test_write_pack_removes_stale_parts() {
        let temp = TempDir::new().unwrap();
        let output = temp.path().join("context.md");
        fs::write(part_path(&output, 2), "stale").unwrap();
        fs::write(part_path(&output, 3), "stale").unwrap();

        let packed = repo(vec![FileInput::new("a.py", "x = 1\n")], &PackConfig::default());
        let result = write_pack(&[packed], &output, &WriteOptions::default()).unwrap();
        assert_eq!(result.paths, vec![output.clone()]);
        assert!(result.is_new);
        assert!(!part_path(&output, 2).exists());
        assert!(!part_path(&output, 3).exists());
    }
}
