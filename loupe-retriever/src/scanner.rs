//! Filesystem discovery for indexing.
//!
//! The indexer itself never walks directories; a [`FileScanner`] turns a
//! codebase root into the set of files worth chunking. The default
//! [`IgnoreScanner`] honors `.gitignore`, skips hidden and binary files,
//! and caps file size so a stray generated artifact cannot dominate the
//! index.

use anyhow::Context;
use ignore::WalkBuilder;
use loupe_context::Language;
use std::path::Path;
use tracing::debug;

/// Files above this size are skipped rather than chunked.
pub const MAX_FILE_BYTES: u64 = 1024 * 1024;

/// A file the scanner selected for indexing, decoded to UTF-8.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the scanned root, with `/` separators.
    pub relative_path: String,
    pub text: String,
    pub language: Language,
}

/// A file the scanner saw but did not select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub relative_path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Extension maps to no supported language.
    UnsupportedLanguage,
    /// Larger than [`MAX_FILE_BYTES`].
    TooLarge,
    /// Not valid UTF-8.
    Undecodable,
}

/// Result of one scan. Skips are reported, not silently dropped, so the
/// caller can surface them in indexing stats.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub files: Vec<ScannedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Selects the files under a root that should be indexed.
pub trait FileScanner: Send + Sync {
    fn scan(&self, root: &Path) -> anyhow::Result<ScanOutcome>;
}

/// Default scanner: gitignore-aware walk with hidden files excluded.
#[derive(Debug, Default)]
pub struct IgnoreScanner {
    _private: (),
}

impl IgnoreScanner {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileScanner for IgnoreScanner {
    fn scan(&self, root: &Path) -> anyhow::Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();
        // sort_by_file_name makes scan order (and thus stats) reproducible.
        // require_git(false) keeps .gitignore effective for roots that are
        // not themselves git repositories.
        let walk = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .require_git(false)
            .sort_by_file_name(std::ffi::OsStr::cmp)
            .build();

        for entry in walk {
            let entry = entry.context("walking codebase root")?;
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative_path = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            let language = Language::from_path(path);
            if language == Language::Unknown {
                outcome.skipped.push(SkippedFile {
                    relative_path,
                    reason: SkipReason::UnsupportedLanguage,
                });
                continue;
            }

            let size = entry
                .metadata()
                .map(|m| m.len())
                .with_context(|| format!("reading metadata for {}", path.display()))?;
            if size > MAX_FILE_BYTES {
                debug!(path = %relative_path, size, "skipping oversized file");
                outcome.skipped.push(SkippedFile {
                    relative_path,
                    reason: SkipReason::TooLarge,
                });
                continue;
            }

            let bytes = std::fs::read(path)
                .with_context(|| format!("reading {}", path.display()))?;
            match String::from_utf8(bytes) {
                Ok(text) => outcome.files.push(ScannedFile {
                    relative_path,
                    text,
                    language,
                }),
                Err(_) => outcome.skipped.push(SkippedFile {
                    relative_path,
                    reason: SkipReason::Undecodable,
                }),
            }
        }

        debug!(
            root = %root.display(),
            selected = outcome.files.len(),
            skipped = outcome.skipped.len(),
            "scan complete"
        );
        Ok(outcome)
    }
}
