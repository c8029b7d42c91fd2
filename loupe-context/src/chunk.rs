//! Chunk data model: the addressable unit of indexed content.
//!
//! A [`Chunk`] is an immutable slice of a source file with a contiguous
//! 1-based line range, an optional symbol name, and a content-derived
//! identity. The identity is a blake3 hash over the normalized text plus the
//! path and line range, so re-ingesting identical content always produces
//! the same id and never a duplicate index entry.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Blake3 hash identifying a unique chunk (32 bytes).
pub type ChunkId = [u8; 32];

/// Source language of a file, detected from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Language {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
    Java,
    C,
    Cpp,
    Markdown,
    Unknown,
}

impl Language {
    /// Detect the language from a file path's extension.
    ///
    /// Extensionless documentation files (README, CHANGELOG) are treated as
    /// Markdown; anything unrecognized is `Unknown` and falls back to
    /// window-based chunking.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("rs") => Language::Rust,
            Some("py") => Language::Python,
            Some("js") | Some("jsx") | Some("mjs") => Language::JavaScript,
            Some("ts") | Some("tsx") => Language::TypeScript,
            Some("go") => Language::Go,
            Some("java") => Language::Java,
            Some("c") | Some("h") => Language::C,
            Some("cpp") | Some("cc") | Some("cxx") | Some("hpp") => Language::Cpp,
            Some("md") | Some("markdown") => Language::Markdown,
            _ => {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    if name.starts_with("README") || name.starts_with("CHANGELOG") {
                        return Language::Markdown;
                    }
                }
                Language::Unknown
            }
        }
    }

    /// Inverse of [`Language::name`]; unrecognized names map to `Unknown`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "rust" => Language::Rust,
            "python" => Language::Python,
            "javascript" => Language::JavaScript,
            "typescript" => Language::TypeScript,
            "go" => Language::Go,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "markdown" => Language::Markdown,
            _ => Language::Unknown,
        }
    }

    /// Stable lowercase name, used in logs and filters.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Markdown => "markdown",
            Language::Unknown => "unknown",
        }
    }
}

/// Broad classification of a chunk's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChunkKind {
    Code,
    Docstring,
    Comment,
    Markdown,
}

impl ChunkKind {
    pub fn name(&self) -> &'static str {
        match self {
            ChunkKind::Code => "code",
            ChunkKind::Docstring => "docstring",
            ChunkKind::Comment => "comment",
            ChunkKind::Markdown => "markdown",
        }
    }

    /// Inverse of [`ChunkKind::name`]; unrecognized names map to `Code`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "docstring" => ChunkKind::Docstring,
            "comment" => ChunkKind::Comment,
            "markdown" => ChunkKind::Markdown,
            _ => ChunkKind::Code,
        }
    }
}

/// An immutable, addressable unit of indexed content.
///
/// Line numbers are 1-based and inclusive; `start_line <= end_line` always
/// holds. The `id` is a pure function of the normalized text, the path, and
/// the line range (see [`Chunk::compute_id`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    /// Path relative to the codebase root.
    pub path: String,
    /// Function/class/module name when the chunker recognized a declaration.
    pub symbol: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    pub kind: ChunkKind,
    pub language: Language,
}

impl Chunk {
    pub fn new(
        path: String,
        symbol: Option<String>,
        start_line: usize,
        end_line: usize,
        text: String,
        kind: ChunkKind,
        language: Language,
    ) -> Self {
        debug_assert!(start_line >= 1 && start_line <= end_line);
        let id = Self::compute_id(&path, start_line, end_line, &text);
        Self {
            id,
            path,
            symbol,
            start_line,
            end_line,
            text,
            kind,
            language,
        }
    }

    /// Content hash over normalized text + path + line range.
    ///
    /// Normalization strips carriage returns and trailing whitespace per
    /// line, so editor churn that does not change content does not change
    /// identity.
    pub fn compute_id(path: &str, start_line: usize, end_line: usize, text: &str) -> ChunkId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(start_line as u64).to_le_bytes());
        hasher.update(&(end_line as u64).to_le_bytes());
        for line in text.lines() {
            hasher.update(line.trim_end().as_bytes());
            hasher.update(b"\n");
        }
        *hasher.finalize().as_bytes()
    }

    /// Number of source lines this chunk spans.
    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }

    /// Short hex prefix of the id for logs and citations.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id[..8])
    }

    /// `path:start-end` location string.
    pub fn location(&self) -> String {
        format!("{}:{}-{}", self.path, self.start_line, self.end_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path(Path::new("src/lib.rs")), Language::Rust);
        assert_eq!(Language::from_path(Path::new("a/b.py")), Language::Python);
        assert_eq!(Language::from_path(Path::new("README")), Language::Markdown);
        assert_eq!(Language::from_path(Path::new("doc.md")), Language::Markdown);
        assert_eq!(Language::from_path(Path::new("data.bin")), Language::Unknown);
    }

    #[test]
    fn test_id_is_stable_under_trailing_whitespace() {
        let a = Chunk::compute_id("src/lib.rs", 1, 3, "fn main() {}\nlet x = 1;\n");
        let b = Chunk::compute_id("src/lib.rs", 1, 3, "fn main() {}   \r\nlet x = 1;\n");
        assert_eq!(a, b);
    }

    #[test]
    fn test_id_depends_on_path_and_range() {
        let a = Chunk::compute_id("src/lib.rs", 1, 3, "fn main() {}");
        let b = Chunk::compute_id("src/main.rs", 1, 3, "fn main() {}");
        let c = Chunk::compute_id("src/lib.rs", 2, 4, "fn main() {}");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_location_format() {
        let chunk = Chunk::new(
            "src/lib.rs".to_string(),
            Some("main".to_string()),
            10,
            20,
            "fn main() {}".to_string(),
            ChunkKind::Code,
            Language::Rust,
        );
        assert_eq!(chunk.location(), "src/lib.rs:10-20");
        assert_eq!(chunk.line_count(), 11);
        assert_eq!(chunk.id_hex().len(), 16);
    }
}
