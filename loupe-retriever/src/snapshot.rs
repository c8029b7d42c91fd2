//! Immutable, versioned index snapshots.
//!
//! An [`IndexSnapshot`] holds every indexed chunk together with its optional
//! embedding and a lexical inverted index over content tokens. Snapshots are
//! never mutated: the [`Indexer`](crate::indexer::Indexer) builds a new one
//! with [`SnapshotBuilder`] and publishes it whole, so any number of readers
//! can rank against a pinned `Arc<IndexSnapshot>` without locks while a
//! writer prepares the next generation.
//!
//! Entries are addressed two ways: by content id (dedup) and by
//! `(path, start_line, end_line)` location (supersession of changed text at
//! the same spot).

use half::f16;
use loupe_context::{Chunk, ChunkId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Location key for supersession: path plus 1-based inclusive line range.
pub type LocationKey = (String, usize, usize);

/// A chunk as stored in the index: content plus embedding state.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    /// Present once the embedding provider succeeded for this content.
    pub embedding: Option<Vec<f16>>,
    /// Set when the provider exhausted its retry budget; the chunk stays
    /// lexically searchable but is skipped by vector scoring.
    pub embedding_failed: bool,
}

impl IndexedChunk {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            embedding: None,
            embedding_failed: false,
        }
    }

    pub fn location_key(&self) -> LocationKey {
        (
            self.chunk.path.clone(),
            self.chunk.start_line,
            self.chunk.end_line,
        )
    }
}

/// One immutable generation of the index.
#[derive(Debug)]
pub struct IndexSnapshot {
    generation: u64,
    /// Sorted by (path, start_line, end_line) for deterministic iteration.
    entries: Vec<Arc<IndexedChunk>>,
    by_id: HashMap<ChunkId, usize>,
    by_location: HashMap<LocationKey, usize>,
    /// Inverted index: token -> indexes into `entries`, ascending.
    lexical: HashMap<String, Vec<usize>>,
}

impl IndexSnapshot {
    /// The snapshot before any indexing: generation 0, no entries.
    pub fn empty() -> Self {
        Self {
            generation: 0,
            entries: Vec::new(),
            by_id: HashMap::new(),
            by_location: HashMap::new(),
            lexical: HashMap::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<IndexedChunk>] {
        &self.entries
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &ChunkId) -> Option<&Arc<IndexedChunk>> {
        self.by_id.get(id).map(|&idx| &self.entries[idx])
    }

    pub fn entry_at_location(&self, key: &LocationKey) -> Option<&Arc<IndexedChunk>> {
        self.by_location.get(key).map(|&idx| &self.entries[idx])
    }

    /// Entry indexes whose content contains `token` (exact token match).
    pub fn lexical_postings(&self, token: &str) -> &[usize] {
        self.lexical.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Entries whose embedding attempt exhausted its retries.
    pub fn failed_entries(&self) -> impl Iterator<Item = &Arc<IndexedChunk>> {
        self.entries.iter().filter(|e| e.embedding_failed)
    }
}

/// Lowercased alphanumeric/underscore token runs, the index vocabulary.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Accumulates entries for the next snapshot generation.
///
/// Keyed by location so that a changed chunk at the same `(path, range)`
/// replaces its predecessor, while insertion of an already-present id is
/// idempotent for the caller to detect beforehand.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    generation: u64,
    entries: BTreeMap<LocationKey, Arc<IndexedChunk>>,
}

impl SnapshotBuilder {
    /// Builder for the first real generation.
    pub fn new() -> Self {
        Self {
            generation: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Builder seeded from an existing snapshot; the built snapshot carries
    /// the next generation number.
    pub fn from_snapshot(snapshot: &IndexSnapshot) -> Self {
        let entries = snapshot
            .entries
            .iter()
            .map(|e| (e.location_key(), Arc::clone(e)))
            .collect();
        Self {
            generation: snapshot.generation + 1,
            entries,
        }
    }

    /// Override the generation the built snapshot will carry (used when
    /// restoring from persistence).
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Insert or replace the entry at this chunk's location.
    pub fn insert(&mut self, entry: IndexedChunk) {
        self.entries.insert(entry.location_key(), Arc::new(entry));
    }

    /// Remove every entry belonging to `path`; returns how many went away.
    pub fn remove_path(&mut self, path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(p, _, _), _| p != path);
        before - self.entries.len()
    }

    /// Remove `path` entries whose location is absent from `keep`; returns
    /// how many went away. Used when a file is re-chunked: locations the new
    /// chunking no longer produces must not survive into the next snapshot.
    pub fn prune_path(&mut self, path: &str, keep: &HashSet<LocationKey>) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|key, _| key.0 != path || keep.contains(key));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freeze into an immutable snapshot, computing the id, location, and
    /// lexical indexes.
    pub fn build(self) -> IndexSnapshot {
        let entries: Vec<Arc<IndexedChunk>> = self.entries.into_values().collect();

        let mut by_id = HashMap::with_capacity(entries.len());
        let mut by_location = HashMap::with_capacity(entries.len());
        let mut lexical: HashMap<String, Vec<usize>> = HashMap::new();

        for (idx, entry) in entries.iter().enumerate() {
            by_id.insert(entry.chunk.id, idx);
            by_location.insert(entry.location_key(), idx);

            let mut seen_tokens = std::collections::HashSet::new();
            let symbol_tokens = entry
                .chunk
                .symbol
                .as_deref()
                .map(|s| tokenize(s).collect::<Vec<_>>())
                .unwrap_or_default();
            for token in tokenize(&entry.chunk.text).chain(symbol_tokens) {
                if seen_tokens.insert(token.clone()) {
                    lexical.entry(token).or_default().push(idx);
                }
            }
        }

        IndexSnapshot {
            generation: self.generation,
            entries,
            by_id,
            by_location,
            lexical,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_context::{ChunkKind, Language};

    fn chunk(path: &str, start: usize, end: usize, text: &str) -> Chunk {
        Chunk::new(
            path.to_string(),
            None,
            start,
            end,
            text.to_string(),
            ChunkKind::Code,
            Language::Rust,
        )
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = IndexSnapshot::empty();
        assert_eq!(snapshot.generation(), 0);
        assert!(snapshot.is_empty());
        assert!(snapshot.lexical_postings("anything").is_empty());
    }

    #[test]
    fn test_build_indexes_by_id_and_location() {
        let mut builder = SnapshotBuilder::new();
        let a = chunk("src/a.rs", 1, 5, "fn alpha() {}");
        let b = chunk("src/b.rs", 1, 3, "fn beta() {}");
        builder.insert(IndexedChunk::new(a.clone()));
        builder.insert(IndexedChunk::new(b.clone()));
        let snapshot = builder.build();

        assert_eq!(snapshot.generation(), 1);
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains(&a.id));
        assert!(
            snapshot
                .entry_at_location(&("src/b.rs".to_string(), 1, 3))
                .is_some()
        );
        // Entries sorted by path.
        assert_eq!(snapshot.entries()[0].chunk.path, "src/a.rs");
    }

    #[test]
    fn test_lexical_postings_cover_text_and_symbol() {
        let mut builder = SnapshotBuilder::new();
        let mut entry = IndexedChunk::new(chunk("src/a.rs", 1, 2, "let total = 0;"));
        entry.chunk.symbol = Some("accumulate".to_string());
        builder.insert(entry);
        let snapshot = builder.build();

        assert_eq!(snapshot.lexical_postings("total"), &[0]);
        assert_eq!(snapshot.lexical_postings("accumulate"), &[0]);
        assert!(snapshot.lexical_postings("missing").is_empty());
    }

    #[test]
    fn test_insert_at_same_location_supersedes() {
        let mut builder = SnapshotBuilder::new();
        let old = chunk("src/a.rs", 1, 5, "fn alpha() {}");
        let new = chunk("src/a.rs", 1, 5, "fn alpha() { todo!() }");
        assert_ne!(old.id, new.id);

        builder.insert(IndexedChunk::new(old.clone()));
        builder.insert(IndexedChunk::new(new.clone()));
        let snapshot = builder.build();

        assert_eq!(snapshot.len(), 1);
        assert!(!snapshot.contains(&old.id));
        assert!(snapshot.contains(&new.id));
    }

    #[test]
    fn test_from_snapshot_increments_generation() {
        let mut builder = SnapshotBuilder::new();
        builder.insert(IndexedChunk::new(chunk("src/a.rs", 1, 5, "fn alpha() {}")));
        let first = builder.build();

        let second = SnapshotBuilder::from_snapshot(&first).build();
        assert_eq!(second.generation(), first.generation() + 1);
        assert_eq!(second.len(), first.len());
    }

    #[test]
    fn test_remove_path() {
        let mut builder = SnapshotBuilder::new();
        builder.insert(IndexedChunk::new(chunk("src/a.rs", 1, 5, "fn alpha() {}")));
        builder.insert(IndexedChunk::new(chunk("src/a.rs", 6, 9, "fn gamma() {}")));
        builder.insert(IndexedChunk::new(chunk("src/b.rs", 1, 3, "fn beta() {}")));

        assert_eq!(builder.remove_path("src/a.rs"), 2);
        let snapshot = builder.build();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.entries()[0].chunk.path, "src/b.rs");
    }

    #[test]
    fn test_prune_path_keeps_listed_locations() {
        let mut builder = SnapshotBuilder::new();
        builder.insert(IndexedChunk::new(chunk("src/a.rs", 1, 5, "fn alpha() {}")));
        builder.insert(IndexedChunk::new(chunk("src/a.rs", 6, 9, "fn gamma() {}")));
        builder.insert(IndexedChunk::new(chunk("src/b.rs", 1, 3, "fn beta() {}")));

        let keep: HashSet<LocationKey> = [("src/a.rs".to_string(), 1, 5)].into_iter().collect();
        assert_eq!(builder.prune_path("src/a.rs", &keep), 1);

        let snapshot = builder.build();
        assert_eq!(snapshot.len(), 2);
        assert!(
            snapshot
                .entry_at_location(&("src/a.rs".to_string(), 6, 9))
                .is_none()
        );
        // Other paths are untouched even when absent from `keep`.
        assert!(
            snapshot
                .entry_at_location(&("src/b.rs".to_string(), 1, 3))
                .is_some()
        );
    }

    #[test]
    fn test_tokenize_splits_identifiers() {
        let tokens: Vec<String> = tokenize("fn parse_config(path: &Path) -> Config").collect();
        assert!(tokens.contains(&"parse_config".to_string()));
        assert!(tokens.contains(&"config".to_string()));
        assert!(!tokens.contains(&"".to_string()));
    }
}
