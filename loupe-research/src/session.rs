//! Conversational session state.
//!
//! A session records one question-and-follow-ups exchange: the turn history,
//! the evidence accumulated across retrieval rounds, and where the research
//! loop currently stands. Evidence is append-only; a chunk retrieved by a
//! later query only gains provenance, it is never re-added or re-scored.

use loupe_context::ChunkId;
use loupe_retriever::{IndexedChunk, SearchHit};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// One question/answer exchange. `answer` stays `None` while the question is
/// being researched.
#[derive(Debug, Clone)]
pub struct Turn {
    pub question: String,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Answered,
    /// The index had nothing to offer for this question.
    Exhausted,
    Failed,
}

/// One retrieved chunk with its best score and every query that found it.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub chunk: Arc<IndexedChunk>,
    pub score: f32,
    /// Retrieval queries that surfaced this chunk, in order of first use.
    pub queries: Vec<String>,
}

/// Evidence accumulated across the retrieval rounds of one session.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    items: Vec<EvidenceItem>,
    by_id: HashMap<ChunkId, usize>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one retrieval round into the evidence, returning how many chunks
    /// were genuinely new. Known chunks keep their original score and gain
    /// `query` as provenance.
    pub fn absorb(&mut self, query: &str, hits: Vec<SearchHit>) -> usize {
        let mut added = 0;
        for hit in hits {
            match self.by_id.get(&hit.chunk.chunk.id) {
                Some(&idx) => {
                    let item = &mut self.items[idx];
                    if !item.queries.iter().any(|q| q == query) {
                        item.queries.push(query.to_string());
                    }
                }
                None => {
                    self.by_id.insert(hit.chunk.chunk.id, self.items.len());
                    self.items.push(EvidenceItem {
                        chunk: hit.chunk,
                        score: hit.score,
                        queries: vec![query.to_string()],
                    });
                    added += 1;
                }
            }
        }
        added
    }

    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &ChunkId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Every query issued so far, in first-use order without repeats.
    pub fn issued_queries(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for item in &self.items {
            for query in &item.queries {
                if !seen.contains(&query.as_str()) {
                    seen.push(query.as_str());
                }
            }
        }
        seen
    }
}

/// State for one conversation, owned by the engine between `ask` calls.
#[derive(Debug)]
pub struct Session {
    pub id: Uuid,
    pub history: Vec<Turn>,
    pub evidence: Evidence,
    /// Number of completed retrieval rounds across the whole session.
    pub iteration_count: u32,
    pub status: SessionStatus,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
            evidence: Evidence::new(),
            iteration_count: 0,
            status: SessionStatus::Active,
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
