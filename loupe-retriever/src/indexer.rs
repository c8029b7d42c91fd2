//! Index writer: dedup, embedding generation, snapshot publication.
//!
//! The indexer is the single writer over the shared snapshot. An upsert
//! dedups incoming chunks by content id, embeds the genuinely new ones in
//! bounded-concurrency batches (retrying transient provider failures with
//! exponential backoff), and only then publishes a complete new
//! [`IndexSnapshot`]. Readers holding the previous `Arc` keep a fully
//! consistent view; nobody ever sees a half-updated index.
//!
//! A chunk whose embedding attempts are exhausted is stored with
//! `embedding_failed` set: it stays lexically searchable and can be repaired
//! later via [`Indexer::retry_failed_embeddings`].

use crate::snapshot::{IndexSnapshot, IndexedChunk, LocationKey, SnapshotBuilder};
use anyhow::Result;
use futures::StreamExt;
use half::f16;
use loupe_context::Chunk;
use loupe_embed::{EmbedError, EmbeddingProvider};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for indexing behavior.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Total embedding attempts per batch before marking chunks degraded.
    pub max_embed_attempts: usize,
    /// Base delay for exponential backoff between attempts.
    pub backoff_base: Duration,
    /// Chunks per embedding call.
    pub embed_batch_size: usize,
    /// Concurrent embedding batches in flight.
    pub max_workers: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_embed_attempts: 3,
            backoff_base: Duration::from_millis(100),
            embed_batch_size: 16,
            max_workers: 4,
        }
    }
}

impl IndexerConfig {
    pub fn with_max_embed_attempts(mut self, attempts: usize) -> Self {
        self.max_embed_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size.max(1);
        self
    }

    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }
}

/// What one upsert changed, relative to the previous snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexDelta {
    /// Chunks whose id was not in the index before.
    pub added: usize,
    /// Chunks that superseded an entry at the same location.
    pub updated: usize,
    /// Chunks already present with an identical id (no-ops).
    pub unchanged: usize,
    /// Entries dropped because a reconciled path no longer produces their
    /// location (see [`Indexer::upsert_paths`]).
    pub removed: usize,
}

/// The single writer over the copy-on-write index.
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    /// Serializes upsert/remove; the snapshot lock is only held to swap.
    writer: Mutex<()>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: IndexerConfig) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            writer: Mutex::new(()),
            config,
        }
    }

    /// Start from a restored snapshot (e.g. loaded from SQLite).
    pub fn with_snapshot(
        provider: Arc<dyn EmbeddingProvider>,
        config: IndexerConfig,
        snapshot: IndexSnapshot,
    ) -> Self {
        Self {
            provider,
            snapshot: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            config,
        }
    }

    /// Pin the current snapshot. The returned `Arc` stays consistent no
    /// matter what the writer does afterwards.
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Insert or update chunks, returning what actually changed.
    ///
    /// Re-upserting an identical chunk is a no-op. A chunk with the same
    /// location but different content supersedes the old entry; the old
    /// embedding disappears together with it when the new snapshot is
    /// published.
    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<IndexDelta> {
        self.apply(chunks, &[]).await
    }

    /// Like [`upsert`](Self::upsert), but treats `chunks` as the complete
    /// current chunking of `paths`: entries of those paths whose location the
    /// new chunking no longer produces are dropped in the same publish. Use
    /// this when a file has been re-read, so a shrunken file cannot leave
    /// stale chunks behind.
    pub async fn upsert_paths(&self, paths: &[String], chunks: Vec<Chunk>) -> Result<IndexDelta> {
        self.apply(chunks, paths).await
    }

    async fn apply(&self, chunks: Vec<Chunk>, reconcile: &[String]) -> Result<IndexDelta> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot().await;

        // Locations the incoming chunking produces, including unchanged
        // chunks that will not be re-inserted below.
        let keep: HashSet<LocationKey> = chunks
            .iter()
            .map(|c| (c.path.clone(), c.start_line, c.end_line))
            .collect();

        let mut delta = IndexDelta::default();
        let mut seen_ids = HashSet::new();
        let mut pending: Vec<Chunk> = Vec::new();

        for chunk in chunks {
            if current.contains(&chunk.id) || !seen_ids.insert(chunk.id) {
                delta.unchanged += 1;
                continue;
            }
            let location = (chunk.path.clone(), chunk.start_line, chunk.end_line);
            if current.entry_at_location(&location).is_some() {
                delta.updated += 1;
            } else {
                delta.added += 1;
            }
            pending.push(chunk);
        }

        let mut builder = SnapshotBuilder::from_snapshot(&current);
        for path in reconcile {
            delta.removed += builder.prune_path(path, &keep);
        }

        if pending.is_empty() && delta.removed == 0 {
            debug!(unchanged = delta.unchanged, "upsert had nothing new");
            return Ok(delta);
        }

        for entry in self.embed_chunks(pending).await {
            builder.insert(entry);
        }
        let next = builder.build();
        info!(
            generation = next.generation(),
            added = delta.added,
            updated = delta.updated,
            unchanged = delta.unchanged,
            removed = delta.removed,
            "published index snapshot"
        );
        *self.snapshot.write().await = Arc::new(next);

        Ok(delta)
    }

    /// Drop every chunk of the given paths (deleted files). Returns the
    /// number of removed chunks.
    pub async fn remove(&self, paths: &[String]) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot().await;

        let mut builder = SnapshotBuilder::from_snapshot(&current);
        let mut removed = 0;
        for path in paths {
            removed += builder.remove_path(path);
        }
        if removed == 0 {
            return Ok(0);
        }

        let next = builder.build();
        info!(generation = next.generation(), removed, "removed paths from index");
        *self.snapshot.write().await = Arc::new(next);
        Ok(removed)
    }

    /// Re-attempt embedding for chunks marked `embedding_failed`. Returns
    /// how many were repaired.
    pub async fn retry_failed_embeddings(&self) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let current = self.snapshot().await;

        let failed: Vec<Chunk> = current
            .failed_entries()
            .map(|e| e.chunk.clone())
            .collect();
        if failed.is_empty() {
            return Ok(0);
        }

        let entries = self.embed_chunks(failed).await;
        let repaired = entries.iter().filter(|e| !e.embedding_failed).count();
        if repaired == 0 {
            return Ok(0);
        }

        let mut builder = SnapshotBuilder::from_snapshot(&current);
        for entry in entries {
            if !entry.embedding_failed {
                builder.insert(entry);
            }
        }
        let next = builder.build();
        info!(generation = next.generation(), repaired, "repaired degraded embeddings");
        *self.snapshot.write().await = Arc::new(next);
        Ok(repaired)
    }

    /// Embed chunks in batches with bounded concurrency; batches that
    /// exhaust the retry budget come back with `embedding_failed` set.
    async fn embed_chunks(&self, chunks: Vec<Chunk>) -> Vec<IndexedChunk> {
        let batches: Vec<Vec<Chunk>> = chunks
            .chunks(self.config.embed_batch_size)
            .map(|b| b.to_vec())
            .collect();

        let results: Vec<(Vec<Chunk>, Result<Vec<Vec<f16>>, EmbedError>)> =
            futures::stream::iter(batches.into_iter().map(|batch| {
                let provider = Arc::clone(&self.provider);
                let config = self.config.clone();
                async move {
                    let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
                    let result = embed_with_retry(provider.as_ref(), &texts, &config).await;
                    (batch, result)
                }
            }))
            .buffer_unordered(self.config.max_workers)
            .collect()
            .await;

        let mut entries = Vec::new();
        for (batch, result) in results {
            match result {
                Ok(embeddings) => {
                    for (chunk, embedding) in batch.into_iter().zip(embeddings) {
                        entries.push(IndexedChunk {
                            chunk,
                            embedding: Some(embedding),
                            embedding_failed: false,
                        });
                    }
                }
                Err(error) => {
                    warn!(%error, chunks = batch.len(), "embedding failed; marking chunks degraded");
                    for chunk in batch {
                        entries.push(IndexedChunk {
                            chunk,
                            embedding: None,
                            embedding_failed: true,
                        });
                    }
                }
            }
        }
        entries
    }
}

/// Call the provider up to `max_embed_attempts` times, sleeping
/// `backoff_base << attempt` between transient failures.
async fn embed_with_retry(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    config: &IndexerConfig,
) -> Result<Vec<Vec<f16>>, EmbedError> {
    let mut attempt = 0;
    loop {
        match provider.embed_texts(texts).await {
            Ok(result) => {
                if result.len() != texts.len() {
                    return Err(EmbedError::invalid_input(format!(
                        "provider returned {} embeddings for {} texts",
                        result.len(),
                        texts.len()
                    )));
                }
                return Ok(result.embeddings);
            }
            Err(error) if error.is_transient() && attempt + 1 < config.max_embed_attempts => {
                let delay = config.backoff_base * (1 << attempt);
                warn!(
                    %error,
                    attempt = attempt + 1,
                    max = config.max_embed_attempts,
                    "transient embedding failure, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use loupe_context::{ChunkKind, Language};
    use loupe_embed::{EmbeddingResult, HashEmbedProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

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

    fn fast_config() -> IndexerConfig {
        IndexerConfig::default().with_backoff_base(Duration::from_millis(1))
    }

    /// Provider that fails transiently a fixed number of times, then
    /// delegates to the hash embedder.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
        inner: HashEmbedProvider,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                inner: HashEmbedProvider::default(),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_text(&self, text: &str) -> loupe_embed::Result<Vec<f16>> {
            let result = self.embed_texts(&[text.to_string()]).await?;
            Ok(result.embeddings.into_iter().next().unwrap())
        }

        async fn embed_texts(&self, texts: &[String]) -> loupe_embed::Result<EmbeddingResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(EmbedError::transient("synthetic outage"));
            }
            self.inner.embed_texts(texts).await
        }

        fn embedding_dimension(&self) -> usize {
            self.inner.embedding_dimension()
        }

        fn provider_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_upsert_then_reupsert_is_idempotent() -> Result<()> {
        let indexer = Indexer::new(Arc::new(HashEmbedProvider::default()), fast_config());
        let chunks = vec![
            chunk("src/a.rs", 1, 5, "fn alpha() {}"),
            chunk("src/b.rs", 1, 3, "fn beta() {}"),
        ];

        let first = indexer.upsert(chunks.clone()).await?;
        assert_eq!(first.added, 2);
        assert_eq!(first.updated, 0);

        let second = indexer.upsert(chunks).await?;
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_chunk_supersedes_atomically() -> Result<()> {
        let indexer = Indexer::new(Arc::new(HashEmbedProvider::default()), fast_config());
        let old = chunk("src/a.rs", 1, 5, "fn alpha() {}");
        indexer.upsert(vec![old.clone()]).await?;

        // Readers pinned to the old snapshot keep seeing the old entry.
        let pinned = indexer.snapshot().await;

        let new = chunk("src/a.rs", 1, 5, "fn alpha() { todo!() }");
        let delta = indexer.upsert(vec![new.clone()]).await?;
        assert_eq!(delta.updated, 1);
        assert_eq!(delta.added, 0);

        let fresh = indexer.snapshot().await;
        assert!(fresh.contains(&new.id));
        assert!(!fresh.contains(&old.id));
        assert!(fresh.get(&new.id).unwrap().embedding.is_some());

        assert!(pinned.contains(&old.id));
        assert!(!pinned.contains(&new.id));
        assert!(fresh.generation() > pinned.generation());
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_paths_drops_vanished_locations() -> Result<()> {
        let indexer = Indexer::new(Arc::new(HashEmbedProvider::default()), fast_config());
        let alpha = chunk("src/a.rs", 1, 5, "fn alpha() {}");
        let beta = chunk("src/a.rs", 6, 9, "fn beta() {}");
        indexer
            .upsert_paths(&["src/a.rs".to_string()], vec![alpha.clone(), beta.clone()])
            .await?;
        assert_eq!(indexer.snapshot().await.len(), 2);

        // The file shrank: re-chunking now yields only `alpha`.
        let delta = indexer
            .upsert_paths(&["src/a.rs".to_string()], vec![alpha.clone()])
            .await?;
        assert_eq!(delta.added, 0);
        assert_eq!(delta.updated, 0);
        assert_eq!(delta.unchanged, 1);
        assert_eq!(delta.removed, 1);

        let snapshot = indexer.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains(&alpha.id));
        assert!(!snapshot.contains(&beta.id));
        assert!(snapshot.lexical_postings("beta").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_paths() -> Result<()> {
        let indexer = Indexer::new(Arc::new(HashEmbedProvider::default()), fast_config());
        indexer
            .upsert(vec![
                chunk("src/a.rs", 1, 5, "fn alpha() {}"),
                chunk("src/a.rs", 6, 9, "fn gamma() {}"),
                chunk("src/b.rs", 1, 3, "fn beta() {}"),
            ])
            .await?;

        let removed = indexer.remove(&["src/a.rs".to_string()]).await?;
        assert_eq!(removed, 2);
        assert_eq!(indexer.snapshot().await.len(), 1);

        // Removing an unknown path changes nothing, including the generation.
        let generation = indexer.snapshot().await.generation();
        assert_eq!(indexer.remove(&["src/zzz.rs".to_string()]).await?, 0);
        assert_eq!(indexer.snapshot().await.generation(), generation);
        Ok(())
    }

    #[tokio::test]
    async fn test_transient_failures_within_budget_index_normally() -> Result<()> {
        // Fails twice, attempt limit 3: the third call succeeds.
        let provider = Arc::new(FlakyProvider::new(2));
        let indexer = Indexer::new(provider, fast_config().with_max_embed_attempts(3));

        indexer
            .upsert(vec![chunk("src/a.rs", 1, 5, "fn alpha() {}")])
            .await?;

        let snapshot = indexer.snapshot().await;
        let entry = &snapshot.entries()[0];
        assert!(entry.embedding.is_some());
        assert!(!entry.embedding_failed);
        Ok(())
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_exhausted_retries_mark_chunk_degraded() -> Result<()> {
        // Fails four times, attempt limit 3: the budget is exhausted.
        let provider = Arc::new(FlakyProvider::new(4));
        let indexer = Indexer::new(provider, fast_config().with_max_embed_attempts(3));

        indexer
            .upsert(vec![chunk("src/a.rs", 1, 5, "fn alpha() {}")])
            .await?;

        let snapshot = indexer.snapshot().await;
        let entry = &snapshot.entries()[0];
        assert!(entry.embedding.is_none());
        assert!(entry.embedding_failed);
        // Still lexically reachable.
        assert_eq!(snapshot.lexical_postings("alpha"), &[0]);
        assert!(logs_contain("marking chunks degraded"));
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_failed_embeddings_repairs_degraded_chunks() -> Result<()> {
        // One upsert call fails terminally, leaving a degraded chunk; the
        // provider recovers before the repair pass.
        let provider = Arc::new(FlakyProvider::new(3));
        let indexer = Indexer::new(provider, fast_config().with_max_embed_attempts(3));

        indexer
            .upsert(vec![chunk("src/a.rs", 1, 5, "fn alpha() {}")])
            .await?;
        assert!(indexer.snapshot().await.entries()[0].embedding_failed);

        let repaired = indexer.retry_failed_embeddings().await?;
        assert_eq!(repaired, 1);
        let snapshot = indexer.snapshot().await;
        assert!(!snapshot.entries()[0].embedding_failed);
        assert!(snapshot.entries()[0].embedding.is_some());

        // Nothing left to repair.
        assert_eq!(indexer.retry_failed_embeddings().await?, 0);
        Ok(())
    }
}
