//! Splitting source files into addressable chunks.
//!
//! The chunker prefers structural boundaries: for recognized languages it
//! cuts at declaration lines (functions, types, classes, Markdown headings)
//! so each chunk spans one logical unit and carries its symbol name. For
//! unknown languages it falls back to a fixed-size sliding window of lines
//! with a configurable overlap fraction, the only mode in which chunk
//! ranges of one file may overlap.
//!
//! [`Chunker::chunk`] returns a lazy [`Chunks`] iterator: span planning is a
//! cheap line scan, but chunk text is only materialized as the caller
//! consumes items, and the iterator is `Clone` so consumption can restart.

use crate::chunk::{Chunk, ChunkKind, Language};
use regex::Regex;
use std::sync::OnceLock;

/// Configuration for chunking behavior.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum lines per chunk; oversized structural units are re-split
    /// into disjoint windows of this size.
    pub max_chunk_lines: usize,
    /// Window size in lines for unknown-language fallback splitting.
    pub window_lines: usize,
    /// Fraction of the window shared between consecutive fallback windows.
    pub overlap_fraction: f32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 100,
            window_lines: 40,
            overlap_fraction: 0.15,
        }
    }
}

impl ChunkerConfig {
    pub fn with_max_chunk_lines(mut self, lines: usize) -> Self {
        self.max_chunk_lines = lines.max(1);
        self
    }

    pub fn with_window_lines(mut self, lines: usize) -> Self {
        self.window_lines = lines.max(1);
        self
    }

    pub fn with_overlap_fraction(mut self, fraction: f32) -> Self {
        self.overlap_fraction = fraction.clamp(0.0, 0.9);
        self
    }
}

/// A planned chunk boundary: 0-based line range, end exclusive.
#[derive(Debug, Clone)]
struct Span {
    start: usize,
    end: usize,
    symbol: Option<String>,
}

/// Splits file content into [`Chunk`]s. Stateless apart from configuration;
/// one instance can chunk any number of files.
#[derive(Debug, Clone, Default)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Chunk `text` belonging to `path`. The returned iterator is finite,
    /// lazy, and restartable via `Clone`; dropping it early leaks nothing.
    pub fn chunk<'a>(&self, path: &'a str, text: &'a str, language: Language) -> Chunks<'a> {
        let lines: Vec<&'a str> = text.lines().collect();
        let spans = if lines.is_empty() {
            Vec::new()
        } else {
            match declaration_pattern(language) {
                Some(pattern) => self.structural_spans(&lines, pattern),
                None => self.window_spans(lines.len()),
            }
        };
        Chunks {
            path,
            language,
            lines,
            spans: spans.into_iter(),
        }
    }

    /// Cut at declaration lines; the region before the first declaration
    /// (imports, module docs) becomes its own chunk. Resulting ranges are
    /// disjoint and ordered.
    fn structural_spans(&self, lines: &[&str], pattern: &Regex) -> Vec<Span> {
        let mut boundaries: Vec<(usize, Option<String>)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            if let Some(caps) = pattern.captures(line) {
                let symbol = caps
                    .iter()
                    .skip(1)
                    .flatten()
                    .next()
                    .map(|m| m.as_str().to_string());
                boundaries.push((idx, symbol));
            }
        }

        let mut spans = Vec::new();
        if boundaries.is_empty() {
            self.push_split(&mut spans, 0, lines.len(), None, lines);
            return spans;
        }

        let first = boundaries[0].0;
        if first > 0 {
            self.push_split(&mut spans, 0, first, None, lines);
        }
        for (i, (start, symbol)) in boundaries.iter().enumerate() {
            let end = boundaries
                .get(i + 1)
                .map(|(next, _)| *next)
                .unwrap_or(lines.len());
            self.push_split(&mut spans, *start, end, symbol.clone(), lines);
        }
        spans
    }

    /// Push `[start, end)` as one span, re-splitting into disjoint windows
    /// of `max_chunk_lines` when oversized. All-blank regions are dropped.
    fn push_split(
        &self,
        spans: &mut Vec<Span>,
        start: usize,
        end: usize,
        symbol: Option<String>,
        lines: &[&str],
    ) {
        let max = self.config.max_chunk_lines;
        let mut at = start;
        while at < end {
            let piece_end = (at + max).min(end);
            if lines[at..piece_end].iter().any(|l| !l.trim().is_empty()) {
                spans.push(Span {
                    start: at,
                    end: piece_end,
                    symbol: symbol.clone(),
                });
            }
            at = piece_end;
        }
    }

    /// Sliding windows with overlap for unparseable content.
    fn window_spans(&self, line_count: usize) -> Vec<Span> {
        let window = self.config.window_lines;
        let overlap = (window as f32 * self.config.overlap_fraction).round() as usize;
        let step = window.saturating_sub(overlap).max(1);

        let mut spans = Vec::new();
        let mut start = 0;
        while start < line_count {
            let end = (start + window).min(line_count);
            spans.push(Span {
                start,
                end,
                symbol: None,
            });
            if end == line_count {
                break;
            }
            start += step;
        }
        spans
    }
}

/// Lazy iterator over the chunks of one file.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    path: &'a str,
    language: Language,
    lines: Vec<&'a str>,
    spans: std::vec::IntoIter<Span>,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let span = self.spans.next()?;
        let text = self.lines[span.start..span.end].join("\n");
        let kind = classify(&self.lines[span.start..span.end], self.language);
        Some(Chunk::new(
            self.path.to_string(),
            span.symbol,
            span.start + 1,
            span.end,
            text,
            kind,
            self.language,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.spans.size_hint()
    }
}

impl ExactSizeIterator for Chunks<'_> {}

/// Declaration-recognizing regex for a language, or `None` when only the
/// window fallback applies. The first non-empty capture group is the symbol.
fn declaration_pattern(language: Language) -> Option<&'static Regex> {
    static RUST: OnceLock<Regex> = OnceLock::new();
    static PYTHON: OnceLock<Regex> = OnceLock::new();
    static JS: OnceLock<Regex> = OnceLock::new();
    static GO: OnceLock<Regex> = OnceLock::new();
    static JAVA: OnceLock<Regex> = OnceLock::new();
    static C: OnceLock<Regex> = OnceLock::new();
    static MARKDOWN: OnceLock<Regex> = OnceLock::new();

    match language {
        Language::Rust => Some(RUST.get_or_init(|| {
            Regex::new(
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|mod|impl(?:<[^>]*>)?)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )
            .expect("valid rust pattern")
        })),
        Language::Python => Some(PYTHON.get_or_init(|| {
            Regex::new(r"^(?:async\s+)?(?:def|class)\s+([A-Za-z_][A-Za-z0-9_]*)")
                .expect("valid python pattern")
        })),
        Language::JavaScript | Language::TypeScript => Some(JS.get_or_init(|| {
            Regex::new(
                r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function|class|interface|enum)\s+([A-Za-z_$][A-Za-z0-9_$]*)|^\s*(?:export\s+)?(?:const|let)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s+)?(?:\(|function)",
            )
            .expect("valid js pattern")
        })),
        Language::Go => Some(GO.get_or_init(|| {
            Regex::new(r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)|^type\s+([A-Za-z_][A-Za-z0-9_]*)")
                .expect("valid go pattern")
        })),
        Language::Java => Some(JAVA.get_or_init(|| {
            Regex::new(
                r"^\s*(?:public\s+|protected\s+|private\s+)?(?:static\s+)?(?:final\s+)?(?:abstract\s+)?(?:class|interface|enum|record)\s+([A-Za-z_][A-Za-z0-9_]*)",
            )
            .expect("valid java pattern")
        })),
        Language::C | Language::Cpp => Some(C.get_or_init(|| {
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:[\s\*]+[A-Za-z_][A-Za-z0-9_]*)*[\s\*]+([A-Za-z_][A-Za-z0-9_]*)\s*\(")
                .expect("valid c pattern")
        })),
        Language::Markdown => Some(MARKDOWN.get_or_init(|| {
            Regex::new(r"^#{1,6}\s+(.+)$").expect("valid markdown pattern")
        })),
        Language::Unknown => None,
    }
}

/// Classify a chunk by what its lines contain.
fn classify(lines: &[&str], language: Language) -> ChunkKind {
    if language == Language::Markdown {
        return ChunkKind::Markdown;
    }

    let nonempty: Vec<&str> = lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect();
    if nonempty.is_empty() {
        return ChunkKind::Code;
    }

    let (doc_prefixes, comment_prefixes): (&[&str], &[&str]) = match language {
        Language::Python => (&["\"\"\"", "'''"], &["#"]),
        Language::Rust => (&["///", "//!"], &["//", "/*", "*", "*/"]),
        _ => (&["/**", "///"], &["//", "/*", "*", "*/", "#"]),
    };

    let all_comments = nonempty.iter().all(|l| {
        doc_prefixes.iter().any(|p| l.starts_with(p))
            || comment_prefixes.iter().any(|p| l.starts_with(p))
    });
    if !all_comments {
        return ChunkKind::Code;
    }
    if nonempty
        .iter()
        .any(|l| doc_prefixes.iter().any(|p| l.starts_with(p)))
    {
        ChunkKind::Docstring
    } else {
        ChunkKind::Comment
    }
}
