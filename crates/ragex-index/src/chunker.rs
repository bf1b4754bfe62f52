//! Structure-aware chunking for Elixir sources with a line-window fallback.
//!
//! Modules are located with boundary patterns over the raw text. A module that
//! fits under the character cap becomes one `module` chunk; a larger one is cut
//! into `module_section` chunks that each repeat the module header and pack
//! whole functions greedily. Files without any module fall back to overlapping
//! line windows.

use std::path::{Component, Path};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Result;

static MODULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"defmodule\s+([A-Z][A-Za-z0-9_.]*)\s+do").unwrap());
static MODULEDOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)@moduledoc\s+"""(.*?)""""#).unwrap());
static PUBLIC_DEF_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"def\s+\w+[^)]*\)").unwrap());
static PRIVATE_DEF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"defp\s+\w+[^)]*\)").unwrap());
static FUNCTION_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*(?:def|end)").unwrap());
static FUNCTION_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:def|defp)\s+(\w+)").unwrap());
static DEF_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*(?:def|defp)\s+").unwrap());

const MODULE_BOUNDARY: &str = "\ndefmodule";
const SECTION_SEPARATOR: &str = "\n\n";
const MAX_HEADER_LINES: usize = 50;

/// Kind of a chunk, serialized under the `type` payload key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    /// A whole module that fits under the size cap.
    Module,
    /// Header plus a run of whole functions from an oversized module.
    ModuleSection,
    /// A line window from a file with no detectable module.
    TextChunk,
}

impl ChunkKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Module => "module",
            Self::ModuleSection => "module_section",
            Self::TextChunk => "text_chunk",
        }
    }
}

impl std::fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub has_docs: bool,
    pub function_count: usize,
}

/// The atomic unit that is embedded, stored, and retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub file: String,
    pub repo: String,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<String>>,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    /// First line of a `text_chunk` window, 1-based.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    /// Last line of a `text_chunk` window, 1-based and inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
}

fn default_max_chunk_chars() -> usize {
    1000
}

fn default_window_lines() -> usize {
    1000
}

fn default_overlap_lines() -> usize {
    200
}

fn default_extensions() -> Vec<String> {
    vec!["ex".into(), "exs".into()]
}

fn default_exclude_dirs() -> Vec<String> {
    vec!["test".into()]
}

/// Chunker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Soft cap on structural chunk length, in characters.
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Line-window length for files without modules.
    #[serde(default = "default_window_lines")]
    pub window_lines: usize,
    /// Lines shared by consecutive windows.
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    /// File extensions picked up by a repository scan, without the dot.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names skipped anywhere below the repository root.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: default_max_chunk_chars(),
            window_lines: default_window_lines(),
            overlap_lines: default_overlap_lines(),
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

impl ChunkerConfig {
    /// Distance between the starts of consecutive line windows.
    #[must_use]
    pub fn window_stride(&self) -> usize {
        self.window_lines.saturating_sub(self.overlap_lines).max(1)
    }

    /// Check that the configuration can produce chunks.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_chunk_chars == 0 {
            return Err("chunker.max_chunk_chars must be greater than 0".into());
        }
        if self.window_lines == 0 {
            return Err("chunker.window_lines must be greater than 0".into());
        }
        if self.overlap_lines >= self.window_lines {
            return Err(format!(
                "chunker.overlap_lines ({}) must be less than chunker.window_lines ({})",
                self.overlap_lines, self.window_lines
            ));
        }
        if self.extensions.is_empty() {
            return Err("chunker.extensions must not be empty".into());
        }
        Ok(())
    }
}

/// A module located in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleUnit<'a> {
    pub name: &'a str,
    /// From the `defmodule` keyword up to the next top-level `defmodule` or end of file.
    pub content: &'a str,
    /// Trimmed `@moduledoc` heredoc, when present and non-empty.
    pub doc: Option<&'a str>,
    pub functions: Vec<FunctionUnit<'a>>,
    /// Byte offset of `content` in the file.
    pub start: usize,
}

/// A function definition located inside a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionUnit<'a> {
    pub name: &'a str,
    pub text: &'a str,
    /// Byte range of `text` inside the module content.
    pub span: std::ops::Range<usize>,
}

/// Locate modules and their functions in `source`.
///
/// A module runs until the next `defmodule` that opens a line, so nested
/// modules stay inside their parent. Functions are listed public first, then
/// private, each group in source order.
#[must_use]
pub fn parse_modules(source: &str) -> Vec<ModuleUnit<'_>> {
    let mut modules = Vec::new();
    let mut pos = 0;

    while let Some(caps) = MODULE_RE.captures_at(source, pos) {
        let (Some(head), Some(name)) = (caps.get(0), caps.get(1)) else {
            break;
        };
        let end = source[head.end()..]
            .find(MODULE_BOUNDARY)
            .map_or(source.len(), |offset| head.end() + offset);
        let content = &source[head.start()..end];

        modules.push(ModuleUnit {
            name: name.as_str(),
            content,
            doc: extract_moduledoc(content),
            functions: extract_functions(content),
            start: head.start(),
        });
        pos = end;
    }

    modules
}

fn extract_moduledoc(content: &str) -> Option<&str> {
    MODULEDOC_RE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|doc| !doc.is_empty())
}

fn extract_functions(content: &str) -> Vec<FunctionUnit<'_>> {
    let mut functions = Vec::new();

    // Two independent passes; private definitions are not merged into source order.
    for pattern in [&*PUBLIC_DEF_RE, &*PRIVATE_DEF_RE] {
        let mut pos = 0;
        while let Some(head) = pattern.find_at(content, pos) {
            let end = FUNCTION_END_RE
                .find_at(content, head.end())
                .map_or(content.len(), |m| m.start());
            let text = &content[head.start()..end];
            if let Some(name) = FUNCTION_NAME_RE.captures(text).and_then(|caps| caps.get(1)) {
                functions.push(FunctionUnit {
                    name: name.as_str(),
                    text,
                    span: head.start()..end,
                });
            }
            pos = end;
        }
    }

    functions
}

/// Leading module lines before the first function definition, at most 50.
fn module_header(content: &str) -> &str {
    let mut end = 0;
    for (i, line) in content.split('\n').enumerate() {
        if i == MAX_HEADER_LINES || DEF_LINE_RE.is_match(line) {
            break;
        }
        end += line.len() + 1;
    }
    content[..end.min(content.len())].trim_end()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Chunk the text of one file. Pure: no IO.
#[must_use]
pub fn chunk_source(source: &str, file: &str, repo: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let modules = parse_modules(source);
    if modules.is_empty() {
        return chunk_by_lines(source, file, repo, config);
    }

    let mut chunks = Vec::new();
    for module in &modules {
        if char_len(module.content) <= config.max_chunk_chars {
            chunks.push(Chunk {
                text: module.content.to_owned(),
                file: file.to_owned(),
                repo: repo.to_owned(),
                kind: ChunkKind::Module,
                module: Some(module.name.to_owned()),
                functions: None,
                metadata: ChunkMetadata {
                    has_docs: module.doc.is_some(),
                    function_count: module.functions.len(),
                },
                line_start: None,
                line_end: None,
            });
        } else {
            let sections = pack_sections(module, file, repo, config.max_chunk_chars);
            if sections.is_empty() {
                tracing::debug!(
                    file,
                    module = module.name,
                    "oversized module has no functions, skipped"
                );
            }
            chunks.extend(sections);
        }
    }
    chunks
}

struct SectionBuilder<'a> {
    module: &'a ModuleUnit<'a>,
    file: &'a str,
    repo: &'a str,
    text: String,
    len: usize,
    functions: Vec<String>,
}

impl SectionBuilder<'_> {
    fn restart(&mut self, start: String) {
        self.len = char_len(&start);
        self.text = start;
    }

    fn push_function(&mut self, function: &FunctionUnit<'_>, function_len: usize) {
        self.text.push_str(SECTION_SEPARATOR);
        self.text.push_str(function.text);
        self.len += SECTION_SEPARATOR.len() + function_len;
        self.functions.push(function.name.to_owned());
    }

    fn take_section(&mut self) -> Chunk {
        let functions = std::mem::take(&mut self.functions);
        Chunk {
            text: std::mem::take(&mut self.text),
            file: self.file.to_owned(),
            repo: self.repo.to_owned(),
            kind: ChunkKind::ModuleSection,
            module: Some(self.module.name.to_owned()),
            metadata: ChunkMetadata {
                has_docs: self.module.doc.is_some(),
                function_count: functions.len(),
            },
            functions: Some(functions),
            line_start: None,
            line_end: None,
        }
    }
}

/// Greedily pack whole functions behind a copy of the module header.
///
/// A closed section never exceeds `max_chars`. A section may only go over the
/// cap when it holds a single function that does not fit next to the header.
fn pack_sections(module: &ModuleUnit<'_>, file: &str, repo: &str, max_chars: usize) -> Vec<Chunk> {
    let header = module_header(module.content);
    let header_len = char_len(header);
    let mut sections = Vec::new();
    let mut builder = SectionBuilder {
        module,
        file,
        repo,
        text: header.to_owned(),
        len: header_len,
        functions: Vec::new(),
    };

    for function in &module.functions {
        let function_len = char_len(function.text);
        let added = SECTION_SEPARATOR.len() + function_len;

        if !builder.functions.is_empty() && builder.len + added > max_chars {
            let previous = builder.functions.last().cloned().unwrap_or_default();
            sections.push(builder.take_section());

            let marked =
                format!("{header}{SECTION_SEPARATOR}  # ... (previous function: {previous})");
            if char_len(&marked) + added <= max_chars {
                builder.restart(marked);
            } else {
                builder.restart(header.to_owned());
            }
        }
        builder.push_function(function, function_len);
    }

    if !builder.functions.is_empty() {
        sections.push(builder.take_section());
    }
    sections
}

fn chunk_by_lines(source: &str, file: &str, repo: &str, config: &ChunkerConfig) -> Vec<Chunk> {
    let lines: Vec<&str> = source.split('\n').collect();
    let window = config.window_lines.max(1);
    let stride = config.window_stride();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < lines.len() {
        let end = (start + window).min(lines.len());
        let text = lines[start..end].join("\n");
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                text,
                file: file.to_owned(),
                repo: repo.to_owned(),
                kind: ChunkKind::TextChunk,
                module: None,
                functions: None,
                metadata: ChunkMetadata::default(),
                line_start: Some(start + 1),
                line_end: Some(end),
            });
        }
        if end == lines.len() {
            break;
        }
        start += stride;
    }
    chunks
}

/// Read and chunk one file. `path` is used as the chunk's `file` label.
///
/// # Errors
///
/// Returns an IO error if the file cannot be read or is not valid UTF-8.
pub async fn chunk_file(path: &Path, repo: &str, config: &ChunkerConfig) -> Result<Vec<Chunk>> {
    chunk_file_labeled(path, &path.display().to_string(), repo, config).await
}

async fn chunk_file_labeled(
    path: &Path,
    label: &str,
    repo: &str,
    config: &ChunkerConfig,
) -> Result<Vec<Chunk>> {
    let source = tokio::fs::read_to_string(path).await?;
    Ok(chunk_source(&source, label, repo, config))
}

/// A file that could not be chunked during a repository scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file: String,
    pub error: String,
}

/// Output of [`chunk_repository`].
#[derive(Debug, Default)]
pub struct RepositoryChunks {
    pub chunks: Vec<Chunk>,
    pub files_scanned: usize,
    pub failures: Vec<FileFailure>,
}

fn is_excluded(rel: &Path, config: &ChunkerConfig) -> bool {
    rel.components().any(|c| match c {
        Component::Normal(name) => config
            .exclude_dirs
            .iter()
            .any(|dir| name.to_str() == Some(dir.as_str())),
        _ => false,
    })
}

fn has_source_extension(path: &Path, config: &ChunkerConfig) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| config.extensions.iter().any(|e| e == ext))
}

fn relative_label(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Path a walk error refers to, when the walker attached one.
fn walk_error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path),
        ignore::Error::Loop { child, .. } => Some(child),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            walk_error_path(err)
        }
        _ => None,
    }
}

/// Chunk every source file under `root`, in sorted path order.
///
/// Hidden and git-ignored entries are skipped, as is anything below a directory
/// named in `exclude_dirs`. Symlinks are followed; link cycles are reported.
/// A file or directory that cannot be read is logged and recorded in
/// `failures`; the scan continues.
pub async fn chunk_repository(
    root: &Path,
    repo: &str,
    config: &ChunkerConfig,
) -> RepositoryChunks {
    let mut out = RepositoryChunks::default();
    let mut entries = Vec::new();

    let walker = ignore::WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .follow_links(true)
        .sort_by_file_path(|a, b| a.cmp(b))
        .build();
    for result in walker {
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                let path = walk_error_path(&e);
                if path.is_some_and(|p| is_excluded(p.strip_prefix(root).unwrap_or(p), config)) {
                    continue;
                }
                let file = path.map_or_else(
                    || root.display().to_string(),
                    |path| relative_label(root, path),
                );
                tracing::warn!(repo, file = %file, error = %e, "skipping unreadable path");
                out.failures.push(FileFailure {
                    file,
                    error: e.to_string(),
                });
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file())
            || !has_source_extension(entry.path(), config)
        {
            continue;
        }
        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if is_excluded(rel.parent().unwrap_or(Path::new("")), config) {
            continue;
        }
        entries.push(entry);
    }

    tracing::info!(repo, total = entries.len(), "chunking repository");

    for entry in &entries {
        out.files_scanned += 1;
        let rel_path = relative_label(root, entry.path());

        match chunk_file_labeled(entry.path(), &rel_path, repo, config).await {
            Ok(chunks) => {
                tracing::debug!(file = %rel_path, chunks = chunks.len(), "chunked");
                out.chunks.extend(chunks);
            }
            Err(e) => {
                tracing::warn!(file = %rel_path, error = %e, "skipping file");
                out.failures.push(FileFailure {
                    file: rel_path,
                    error: e.to_string(),
                });
            }
        }
    }

    out
}
