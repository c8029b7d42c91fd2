//! Query-time ranking over a pinned snapshot.
//!
//! Retrieval is two-stage: cosine similarity over the embedded candidates
//! selects an oversampled pool, which is then re-ranked by a blend of
//! vector similarity and lexical token overlap. The lexical term keeps
//! exact identifier matches competitive (embedding models under-weight
//! them) and keeps `embedding_failed` chunks reachable at all. Filters are
//! applied before ranking so `k` results survive filtering whenever `k`
//! matching chunks exist.

use crate::snapshot::{IndexSnapshot, IndexedChunk, tokenize};
use loupe_context::{Chunk, ChunkKind, Language};
use loupe_embed::{EmbeddingProvider, cosine_similarity};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Errors that reject a retrieval call outright; no partial results.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("k must be at least 1, got {k}")]
    InvalidK { k: usize },

    #[error("invalid filter: {message}")]
    InvalidFilter { message: String },
}

/// Candidate filter, applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Only chunks whose path starts with this prefix.
    pub path_prefix: Option<String>,
    pub language: Option<Language>,
    pub kind: Option<ChunkKind>,
}

impl SearchFilter {
    pub fn with_path_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.path_prefix = Some(prefix.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    pub fn with_kind(mut self, kind: ChunkKind) -> Self {
        self.kind = Some(kind);
        self
    }

    fn validate(&self) -> Result<(), RetrievalError> {
        if let Some(prefix) = &self.path_prefix {
            if prefix.is_empty() {
                return Err(RetrievalError::InvalidFilter {
                    message: "path prefix must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(prefix) = &self.path_prefix {
            if !chunk.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(language) = self.language {
            if chunk.language != language {
                return false;
            }
        }
        if let Some(kind) = self.kind {
            if chunk.kind != kind {
                return false;
            }
        }
        true
    }
}

/// One ranked result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk: Arc<IndexedChunk>,
    /// Blended relevance in `[0, 1]`-ish space; comparable within one call.
    pub score: f32,
}

/// Ranking knobs. The defaults are deliberate choices, not contracts;
/// callers tune them per corpus.
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Weight of vector similarity in the blended score; the remainder goes
    /// to lexical overlap.
    pub alpha: f32,
    /// The blend re-ranks the top `oversample * k` vector candidates.
    pub oversample: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            oversample: 4,
        }
    }
}

impl RetrieverConfig {
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn with_oversample(mut self, oversample: usize) -> Self {
        self.oversample = oversample.max(1);
        self
    }
}

/// Read-side search over pinned snapshots. Holds no index state of its own,
/// so one retriever serves any number of concurrent callers.
pub struct Retriever {
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: RetrieverConfig) -> Self {
        Self { provider, config }
    }

    /// Rank the snapshot's chunks against `query`, returning at most `k`
    /// hits in deterministic order.
    ///
    /// Returns fewer than `k` hits only when fewer matching chunks exist;
    /// an empty index yields an empty result, never an error. Ties are
    /// broken by shorter text, then path, then start line.
    ///
    /// Chunks whose embedding failed are reachable only through the lexical
    /// stage: one that shares no token with the query cannot enter the
    /// candidate pool, so the result may hold fewer than `k` hits even when
    /// `k` chunks exist.
    pub async fn retrieve(
        &self,
        snapshot: &IndexSnapshot,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchHit>, RetrievalError> {
        if k < 1 {
            return Err(RetrievalError::InvalidK { k });
        }
        filter.validate()?;

        let candidates: Vec<usize> = snapshot
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, entry)| filter.matches(&entry.chunk))
            .map(|(idx, _)| idx)
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let candidate_set: HashSet<usize> = candidates.iter().copied().collect();

        // Query embedding failure degrades to lexical-only ranking rather
        // than failing the call.
        let query_vec = match self.provider.embed_text(query).await {
            Ok(vec) => Some(vec),
            Err(error) => {
                warn!(%error, "query embedding failed; falling back to lexical ranking");
                None
            }
        };

        let query_tokens: HashSet<String> = tokenize(query).collect();
        let lexical = lexical_overlap(snapshot, &query_tokens, &candidate_set);

        let pool_size = self.config.oversample.saturating_mul(k);

        // Vector stage: score embedded candidates, keep the oversampled top.
        let mut pool: HashSet<usize> = HashSet::new();
        let mut vector_scores: HashMap<usize, f32> = HashMap::new();
        if let Some(query_vec) = &query_vec {
            let mut scored: Vec<(usize, f32)> = candidates
                .iter()
                .filter_map(|&idx| {
                    let entry = &snapshot.entries()[idx];
                    entry
                        .embedding
                        .as_ref()
                        .filter(|_| !entry.embedding_failed)
                        .map(|embedding| (idx, cosine_similarity(query_vec, embedding)))
                })
                .collect();
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            scored.truncate(pool_size);
            for (idx, score) in scored {
                vector_scores.insert(idx, score);
                pool.insert(idx);
            }
        }

        // Lexical stage: make sure exact-match candidates (including chunks
        // without embeddings) reach the blend.
        let mut lexical_ranked: Vec<(usize, f32)> = lexical
            .iter()
            .map(|(&idx, &overlap)| (idx, overlap))
            .collect();
        lexical_ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        lexical_ranked.truncate(pool_size);
        for (idx, _) in lexical_ranked {
            pool.insert(idx);
        }

        // Blend and order deterministically.
        let alpha = if query_vec.is_some() { self.config.alpha } else { 0.0 };
        let mut hits: Vec<(usize, f32)> = pool
            .into_iter()
            .map(|idx| {
                let vector = vector_scores.get(&idx).copied().unwrap_or(0.0);
                let overlap = lexical.get(&idx).copied().unwrap_or(0.0);
                (idx, alpha * vector + (1.0 - alpha) * overlap)
            })
            .collect();
        hits.sort_by(|&(a_idx, a_score), &(b_idx, b_score)| {
            let a = &snapshot.entries()[a_idx].chunk;
            let b = &snapshot.entries()[b_idx].chunk;
            b_score
                .partial_cmp(&a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.text.len().cmp(&b.text.len()))
                .then_with(|| a.path.cmp(&b.path))
                .then_with(|| a.start_line.cmp(&b.start_line))
        });
        hits.truncate(k);

        debug!(
            query,
            k,
            candidates = candidates.len(),
            results = hits.len(),
            "retrieval complete"
        );
        Ok(hits
            .into_iter()
            .map(|(idx, score)| SearchHit {
                chunk: Arc::clone(&snapshot.entries()[idx]),
                score,
            })
            .collect())
    }
}

/// Fraction of query tokens present in each candidate, via the inverted
/// index. Candidates sharing no token are absent from the map.
fn lexical_overlap(
    snapshot: &IndexSnapshot,
    query_tokens: &HashSet<String>,
    candidates: &HashSet<usize>,
) -> HashMap<usize, f32> {
    let mut matched: HashMap<usize, usize> = HashMap::new();
    for token in query_tokens {
        for &idx in snapshot.lexical_postings(token) {
            if candidates.contains(&idx) {
                *matched.entry(idx).or_default() += 1;
            }
        }
    }
    if query_tokens.is_empty() {
        return HashMap::new();
    }
    matched
        .into_iter()
        .map(|(idx, count)| (idx, count as f32 / query_tokens.len() as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{Indexer, IndexerConfig};
    use loupe_context::Chunk;
    use loupe_embed::HashEmbedProvider;

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

    fn retriever() -> Retriever {
        Retriever::new(
            Arc::new(HashEmbedProvider::default()),
            RetrieverConfig::default(),
        )
    }

    async fn indexed(chunks: Vec<Chunk>) -> Arc<IndexSnapshot> {
        let indexer = Indexer::new(Arc::new(HashEmbedProvider::default()), IndexerConfig::default());
        indexer.upsert(chunks).await.unwrap();
        indexer.snapshot().await
    }

    #[tokio::test]
    async fn test_invalid_k_rejected() {
        let snapshot = IndexSnapshot::empty();
        let result = retriever()
            .retrieve(&snapshot, "anything", 0, &SearchFilter::default())
            .await;
        assert!(matches!(result, Err(RetrievalError::InvalidK { k: 0 })));
    }

    #[tokio::test]
    async fn test_empty_prefix_filter_rejected() {
        let snapshot = IndexSnapshot::empty();
        let filter = SearchFilter::default().with_path_prefix("");
        let result = retriever().retrieve(&snapshot, "anything", 5, &filter).await;
        assert!(matches!(result, Err(RetrievalError::InvalidFilter { .. })));
    }

    #[tokio::test]
    async fn test_empty_index_returns_empty() -> anyhow::Result<()> {
        let snapshot = IndexSnapshot::empty();
        let hits = retriever()
            .retrieve(&snapshot, "anything", 5, &SearchFilter::default())
            .await?;
        assert!(hits.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_identifier_match_ranks_first() -> anyhow::Result<()> {
        let snapshot = indexed(vec![
            chunk("src/math.rs", 1, 4, "pub fn foo(a: i32) -> i32 { a * 2 }"),
            chunk("src/http.rs", 1, 4, "pub fn serve(addr: SocketAddr) { listen(addr) }"),
            chunk("src/db.rs", 1, 4, "pub fn connect(url: &str) -> Pool { Pool::new(url) }"),
        ])
        .await;

        let hits = retriever()
            .retrieve(&snapshot, "what does foo do", 2, &SearchFilter::default())
            .await?;
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk.chunk.path, "src/math.rs");
        Ok(())
    }

    #[tokio::test]
    async fn test_filters_applied_before_ranking() -> anyhow::Result<()> {
        let snapshot = indexed(vec![
            chunk("src/a.rs", 1, 2, "fn alpha() { foo() }"),
            chunk("tests/a.rs", 1, 2, "fn alpha_test() { foo() }"),
        ])
        .await;

        let filter = SearchFilter::default().with_path_prefix("tests/");
        let hits = retriever().retrieve(&snapshot, "foo", 5, &filter).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.chunk.path, "tests/a.rs");
        Ok(())
    }

    #[tokio::test]
    async fn test_deterministic_ordering_and_tie_break() -> anyhow::Result<()> {
        // Two chunks with identical text share every score component; the
        // tie must break by path.
        let snapshot = indexed(vec![
            chunk("src/b.rs", 1, 2, "fn duplicate() { foo() }"),
            chunk("src/a.rs", 1, 2, "fn duplicate() { foo() }"),
            chunk("src/c.rs", 1, 2, "fn other() { bar() }"),
        ])
        .await;

        let first = retriever()
            .retrieve(&snapshot, "duplicate foo", 3, &SearchFilter::default())
            .await?;
        let second = retriever()
            .retrieve(&snapshot, "duplicate foo", 3, &SearchFilter::default())
            .await?;

        let order =
            |hits: &[SearchHit]| hits.iter().map(|h| h.chunk.chunk.path.clone()).collect::<Vec<_>>();
        assert_eq!(order(&first), order(&second));
        assert_eq!(first[0].chunk.chunk.path, "src/a.rs");
        assert_eq!(first[1].chunk.chunk.path, "src/b.rs");
        Ok(())
    }

    #[tokio::test]
    async fn test_shorter_chunk_wins_equal_scores() -> anyhow::Result<()> {
        // Identical token multiset in both texts, so embedding and lexical
        // overlap tie exactly; only the raw text length differs and the
        // shorter text must rank first.
        let snapshot = indexed(vec![
            chunk("src/long.rs", 1, 3, "fn target() {\n    helper()\n}"),
            chunk("src/short.rs", 1, 2, "fn target() { helper() }"),
        ])
        .await;

        let hits = retriever()
            .retrieve(&snapshot, "target helper", 2, &SearchFilter::default())
            .await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk.path, "src/short.rs");
        Ok(())
    }

    #[tokio::test]
    async fn test_returns_at_most_k() -> anyhow::Result<()> {
        let chunks: Vec<Chunk> = (0..10)
            .map(|i| chunk(&format!("src/f{i}.rs"), 1, 2, &format!("fn item{i}() {{ shared() }}")))
            .collect();
        let snapshot = indexed(chunks).await;

        let hits = retriever()
            .retrieve(&snapshot, "shared", 3, &SearchFilter::default())
            .await?;
        assert_eq!(hits.len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_degraded_chunk_found_lexically() -> anyhow::Result<()> {
        use crate::snapshot::{IndexedChunk, SnapshotBuilder};

        // Build a snapshot where the only matching chunk has no embedding.
        let mut builder = SnapshotBuilder::new();
        let mut entry = IndexedChunk::new(chunk("src/a.rs", 1, 2, "fn rare_symbol_xyz() {}"));
        entry.embedding_failed = true;
        builder.insert(entry);
        let snapshot = builder.build();

        let hits = retriever()
            .retrieve(&snapshot, "rare_symbol_xyz", 1, &SearchFilter::default())
            .await?;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.embedding_failed);

        // With no token in common the degraded chunk has no lexical path
        // into the pool, so the result underfills k.
        let hits = retriever()
            .retrieve(&snapshot, "completely unrelated words", 1, &SearchFilter::default())
            .await?;
        assert!(hits.is_empty());
        Ok(())
    }
}
