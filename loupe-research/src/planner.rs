//! Deterministic fallback planner.
//!
//! [`HeuristicPlanner`] is the pluggable-heuristic end of the planning
//! capability: the first query is the raw question, and follow-up queries
//! chase call targets that appear in retrieved code but whose own definition
//! has not been retrieved yet. When no gap remains it signals sufficiency,
//! so the loop terminates without an LLM in the loop.

use crate::capabilities::{PlanOutcome, Planner};
use crate::session::{Evidence, Turn};
use async_trait::async_trait;
use tracing::debug;

#[derive(Debug, Default)]
pub struct HeuristicPlanner {
    _private: (),
}

impl HeuristicPlanner {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Planner for HeuristicPlanner {
    async fn plan(
        &self,
        question: &str,
        _history: &[Turn],
        evidence: &Evidence,
    ) -> anyhow::Result<PlanOutcome> {
        let issued = evidence.issued_queries();
        if issued.is_empty() {
            return Ok(PlanOutcome::NextQuery(question.to_string()));
        }

        // Symbols defined by chunks already in evidence need no follow-up.
        let defined: Vec<&str> = evidence
            .items()
            .iter()
            .filter_map(|item| item.chunk.chunk.symbol.as_deref())
            .collect();

        for item in evidence.items() {
            for target in call_targets(&item.chunk.chunk.text) {
                if defined.contains(&target) || issued.contains(&target) {
                    continue;
                }
                debug!(target, "following unretrieved call target");
                return Ok(PlanOutcome::NextQuery(target.to_string()));
            }
        }
        Ok(PlanOutcome::Sufficient)
    }
}

const KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "match", "return", "fn", "def", "switch", "catch", "function",
    "new", "assert", "print", "println", "sizeof", "typeof",
];

/// Identifiers immediately followed by `(`, in source order without repeats.
fn call_targets(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut targets = Vec::new();
    let mut start = None;
    for (i, &b) in bytes.iter().enumerate() {
        let ident = b.is_ascii_alphanumeric() || b == b'_';
        match (start, ident) {
            (None, true) if !b.is_ascii_digit() => start = Some(i),
            (Some(s), false) => {
                if b == b'(' {
                    let word = &text[s..i];
                    if !KEYWORDS.contains(&word) && !targets.contains(&word) {
                        targets.push(word);
                    }
                }
                start = None;
            }
            _ => {}
        }
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use loupe_context::{Chunk, ChunkKind, Language};
    use loupe_retriever::{IndexedChunk, SearchHit};
    use std::sync::Arc;

    fn hit(path: &str, symbol: Option<&str>, text: &str) -> SearchHit {
        let chunk = Chunk::new(
            path.to_string(),
            symbol.map(str::to_string),
            1,
            3,
            text.to_string(),
            ChunkKind::Code,
            Language::Rust,
        );
        SearchHit {
            chunk: Arc::new(IndexedChunk::new(chunk)),
            score: 0.5,
        }
    }

    #[test]
    fn test_call_targets_skip_keywords_and_literals() {
        let targets = call_targets("if x { helper(1); other_fn(2); helper(3) }");
        assert_eq!(targets, vec!["helper", "other_fn"]);
    }

    #[tokio::test]
    async fn test_first_query_is_the_raw_question() {
        let planner = HeuristicPlanner::new();
        let outcome = planner
            .plan("how is parsing done", &[], &Evidence::new())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PlanOutcome::NextQuery("how is parsing done".to_string())
        );
    }

    #[tokio::test]
    async fn test_follows_unretrieved_call_target() {
        let planner = HeuristicPlanner::new();
        let mut evidence = Evidence::new();
        evidence.absorb(
            "question",
            vec![hit("a.rs", Some("outer"), "fn outer() { inner() }")],
        );

        let outcome = planner.plan("question", &[], &evidence).await.unwrap();
        assert_eq!(outcome, PlanOutcome::NextQuery("inner".to_string()));
    }

    #[tokio::test]
    async fn test_sufficient_when_all_targets_retrieved() {
        let planner = HeuristicPlanner::new();
        let mut evidence = Evidence::new();
        evidence.absorb(
            "question",
            vec![hit("a.rs", Some("outer"), "fn outer() { inner() }")],
        );
        evidence.absorb("inner", vec![hit("b.rs", Some("inner"), "fn inner() {}")]);

        let outcome = planner.plan("question", &[], &evidence).await.unwrap();
        assert_eq!(outcome, PlanOutcome::Sufficient);
    }
}
