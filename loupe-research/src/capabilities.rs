//! Injected capabilities.
//!
//! The research loop never talks to a model directly; planning and answer
//! generation are traits implemented by the caller (an LLM client in
//! production, deterministic doubles in tests). Embedding uses
//! [`loupe_embed::EmbeddingProvider`] the same way.

use crate::session::{Evidence, Turn};
use async_trait::async_trait;

/// What the planner decided after seeing the evidence gathered so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Run another retrieval round with this query.
    NextQuery(String),
    /// The evidence suffices; move to synthesis.
    Sufficient,
}

/// Derives the next retrieval query from the question, the conversation so
/// far, and the evidence already accumulated.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        question: &str,
        history: &[Turn],
        evidence: &Evidence,
    ) -> anyhow::Result<PlanOutcome>;
}

/// Produces answer text from a fully assembled grounded prompt.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
