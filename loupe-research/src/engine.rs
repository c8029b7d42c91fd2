//! Boundary surface for callers.
//!
//! [`ResearchEngine`] wires the chunker, indexer, retriever, orchestrator,
//! and synthesizer together behind three operations: `index` a codebase,
//! `ask` a question (optionally continuing a session), and `close_session`.
//! All model-facing behavior comes from the injected capabilities, so the
//! whole engine runs deterministically under test doubles.

use crate::capabilities::{Generator, Planner};
use crate::error::ResearchError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig, ResearchOutcome};
use crate::session::{Session, SessionStatus, Turn};
use crate::synthesizer::{Answer, Synthesizer, SynthesizerConfig};
use loupe_context::{Chunker, ChunkerConfig};
use loupe_embed::EmbeddingProvider;
use loupe_retriever::{
    FileScanner, IgnoreScanner, IndexSnapshot, Indexer, IndexerConfig, Retriever, RetrieverConfig,
    ScannedFile, SkippedFile,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Outcome of one `index` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexStats {
    pub chunks_added: usize,
    pub chunks_updated: usize,
    /// Chunks whose content was already indexed; re-indexing an unchanged
    /// codebase reports everything here.
    pub chunks_skipped: usize,
    /// Stale chunks dropped because a re-indexed file no longer contains
    /// them (e.g. the file shrank).
    pub chunks_removed: usize,
    /// Files the scanner saw but did not index.
    pub skipped_files: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub chunker: ChunkerConfig,
    pub indexer: IndexerConfig,
    pub retriever: RetrieverConfig,
    pub orchestrator: OrchestratorConfig,
    pub synthesizer: SynthesizerConfig,
}

pub struct ResearchEngine {
    chunker: Chunker,
    indexer: Indexer,
    orchestrator: Orchestrator,
    synthesizer: Synthesizer,
    scanner: Box<dyn FileScanner>,
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl ResearchEngine {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        planner: Arc<dyn Planner>,
        generator: Arc<dyn Generator>,
        config: EngineConfig,
    ) -> Self {
        let retriever = Retriever::new(Arc::clone(&provider), config.retriever);
        Self {
            chunker: Chunker::new(config.chunker),
            indexer: Indexer::new(provider, config.indexer),
            orchestrator: Orchestrator::new(planner, retriever, config.orchestrator),
            synthesizer: Synthesizer::new(generator, config.synthesizer),
            scanner: Box::new(IgnoreScanner::new()),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Replace the default gitignore-aware scanner.
    pub fn with_scanner(mut self, scanner: Box<dyn FileScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Scan `codebase_root` and index every selected file.
    pub async fn index(&self, codebase_root: &Path) -> Result<IndexStats, ResearchError> {
        let outcome = self.scanner.scan(codebase_root)?;
        let mut stats = self.index_files(outcome.files).await?;
        stats.skipped_files = outcome.skipped;
        Ok(stats)
    }

    /// Chunk and index already-scanned files. Each file's previous chunks
    /// are reconciled against its new chunking, so content that vanished
    /// from a file vanishes from the index in the same publish.
    pub async fn index_files(&self, files: Vec<ScannedFile>) -> Result<IndexStats, ResearchError> {
        let mut chunks = Vec::new();
        let mut paths = Vec::new();
        for file in &files {
            chunks.extend(self.chunker.chunk(&file.relative_path, &file.text, file.language));
            paths.push(file.relative_path.clone());
        }
        let delta = self.indexer.upsert_paths(&paths, chunks).await?;
        let stats = IndexStats {
            chunks_added: delta.added,
            chunks_updated: delta.updated,
            chunks_skipped: delta.unchanged,
            chunks_removed: delta.removed,
            skipped_files: Vec::new(),
        };
        info!(
            files = files.len(),
            added = stats.chunks_added,
            updated = stats.chunks_updated,
            skipped = stats.chunks_skipped,
            removed = stats.chunks_removed,
            "indexing complete"
        );
        Ok(stats)
    }

    /// Drop every indexed chunk for the given paths (deleted files).
    pub async fn remove(&self, paths: &[String]) -> Result<(), ResearchError> {
        self.indexer.remove(paths).await?;
        Ok(())
    }

    /// Re-attempt embedding for chunks that exhausted their retry budget.
    pub async fn retry_failed_embeddings(&self) -> Result<usize, ResearchError> {
        Ok(self.indexer.retry_failed_embeddings().await?)
    }

    /// The current published index snapshot.
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.indexer.snapshot().await
    }

    /// Research and answer `question`.
    ///
    /// With `session_id = None` a new session is created; with an existing
    /// id the session's history and evidence carry over, and a terminal
    /// session becomes active again for the follow-up. The returned id
    /// addresses the session in later calls.
    pub async fn ask(
        &self,
        question: &str,
        session_id: Option<Uuid>,
    ) -> Result<(Uuid, Answer), ResearchError> {
        let mut session = match session_id {
            Some(id) => self
                .sessions
                .lock()
                .await
                .remove(&id)
                .ok_or(ResearchError::UnknownSession(id))?,
            None => Session::new(),
        };
        let id = session.id;
        session.status = SessionStatus::Active;
        session.history.push(Turn {
            question: question.to_string(),
            answer: None,
        });

        let result = self.research_and_synthesize(&mut session, question).await;
        let result = match result {
            Ok(answer) => {
                if let Some(turn) = session.history.last_mut() {
                    turn.answer = Some(answer.text.clone());
                }
                Ok((id, answer))
            }
            Err(error) => {
                warn!(session = %id, %error, "session failed");
                session.status = SessionStatus::Failed;
                Err(error)
            }
        };
        // Failed sessions are kept too; their partial evidence backs a
        // degraded answer or a retried follow-up.
        self.sessions.lock().await.insert(id, session);
        result
    }

    async fn research_and_synthesize(
        &self,
        session: &mut Session,
        question: &str,
    ) -> Result<Answer, ResearchError> {
        let snapshot = self.indexer.snapshot().await;
        let budget = self.orchestrator.config().session_timeout;

        let session_id = session.id;
        let outcome = tokio::time::timeout(
            budget,
            self.orchestrator.research(&snapshot, session, question),
        )
        .await
        .map_err(|_| ResearchError::Timeout {
            session: session_id,
            budget,
        })??;

        let answer = self
            .synthesizer
            .synthesize(question, &session.history, &session.evidence)
            .await?;
        session.status = match outcome {
            ResearchOutcome::Synthesize => SessionStatus::Answered,
            ResearchOutcome::Exhausted => SessionStatus::Exhausted,
        };
        Ok(answer)
    }

    /// Release a session's state.
    pub async fn close_session(&self, session_id: Uuid) -> Result<(), ResearchError> {
        self.sessions
            .lock()
            .await
            .remove(&session_id)
            .map(|_| ())
            .ok_or(ResearchError::UnknownSession(session_id))
    }

    /// Status of a session, if it exists.
    pub async fn session_status(&self, session_id: Uuid) -> Option<SessionStatus> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .map(|s| s.status)
    }

    /// How many evidence chunks a session has accumulated. Survives a
    /// timeout or capability failure, backing degraded-answer decisions.
    pub async fn session_evidence_count(&self, session_id: Uuid) -> Option<usize> {
        self.sessions
            .lock()
            .await
            .get(&session_id)
            .map(|s| s.evidence.len())
    }
}
