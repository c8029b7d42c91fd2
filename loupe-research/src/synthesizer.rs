//! Grounded answer assembly.
//!
//! The synthesizer turns accumulated evidence into a prompt with numbered,
//! cited passages and hands it to the generation capability. Evidence is
//! packed highest-score-first under a token budget, with near-duplicate
//! chunks collapsed to their best-scored representative. Empty evidence
//! short-circuits to an explicit insufficient-evidence answer; the generator
//! is never asked to answer from nothing.

use crate::capabilities::Generator;
use crate::error::ResearchError;
use crate::session::{Evidence, EvidenceItem, Turn};
use loupe_context::ChunkId;
use loupe_embed::cosine_similarity;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Returned when the session ends with nothing retrievable.
pub const INSUFFICIENT_EVIDENCE: &str =
    "Insufficient evidence: the indexed codebase contains nothing relevant to this question.";

#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Evidence token budget for the prompt; tokens are estimated at four
    /// characters each.
    pub token_budget: usize,
    /// Cosine similarity above which two chunks count as near-duplicates.
    pub dedup_threshold: f32,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            token_budget: 3000,
            dedup_threshold: 0.9,
        }
    }
}

/// A chunk the answer is grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub chunk_id: ChunkId,
    pub path: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// The passages included in the prompt, in prompt order. Empty exactly
    /// when the answer is the insufficient-evidence text.
    pub citations: Vec<Citation>,
}

pub struct Synthesizer {
    generator: Arc<dyn Generator>,
    config: SynthesizerConfig,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: SynthesizerConfig) -> Self {
        Self { generator, config }
    }

    pub async fn synthesize(
        &self,
        question: &str,
        history: &[Turn],
        evidence: &Evidence,
    ) -> Result<Answer, ResearchError> {
        if evidence.is_empty() {
            return Ok(Answer {
                text: INSUFFICIENT_EVIDENCE.to_string(),
                citations: Vec::new(),
            });
        }

        let packed = self.pack(evidence);
        let prompt = build_prompt(question, history, &packed);
        debug!(
            passages = packed.len(),
            prompt_chars = prompt.len(),
            "synthesizing answer"
        );

        // One retry on generation failure, then the session fails.
        let text = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(error) => {
                warn!(%error, "generation failed, retrying once");
                self.generator
                    .generate(&prompt)
                    .await
                    .map_err(ResearchError::Generation)?
            }
        };

        let citations = packed
            .iter()
            .map(|item| Citation {
                chunk_id: item.chunk.chunk.id,
                path: item.chunk.chunk.path.clone(),
                start_line: item.chunk.chunk.start_line,
                end_line: item.chunk.chunk.end_line,
            })
            .collect();
        Ok(Answer { text, citations })
    }

    /// Select evidence for the prompt: best score first, near-duplicates
    /// collapsed, cut off at the token budget.
    fn pack<'a>(&self, evidence: &'a Evidence) -> Vec<&'a EvidenceItem> {
        let mut ranked: Vec<&EvidenceItem> = evidence.items().iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.chunk.text.len().cmp(&b.chunk.chunk.text.len()))
                .then_with(|| a.chunk.chunk.path.cmp(&b.chunk.chunk.path))
                .then_with(|| a.chunk.chunk.start_line.cmp(&b.chunk.chunk.start_line))
        });

        let char_budget = self.config.token_budget.saturating_mul(4);
        let mut used = 0;
        let mut packed: Vec<&EvidenceItem> = Vec::new();
        for item in ranked {
            if self.is_near_duplicate(item, &packed) {
                continue;
            }
            let cost = item.chunk.chunk.text.len();
            if !packed.is_empty() && used + cost > char_budget {
                break;
            }
            used += cost;
            packed.push(item);
        }
        packed
    }

    fn is_near_duplicate(&self, item: &EvidenceItem, packed: &[&EvidenceItem]) -> bool {
        packed.iter().any(|kept| {
            if kept.chunk.chunk.text == item.chunk.chunk.text {
                return true;
            }
            match (&kept.chunk.embedding, &item.chunk.embedding) {
                (Some(a), Some(b)) => cosine_similarity(a, b) > self.config.dedup_threshold,
                _ => false,
            }
        })
    }
}

fn build_prompt(question: &str, history: &[Turn], packed: &[&EvidenceItem]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "Answer the question using only the numbered code passages below. \
         Cite passages by number.\n\n",
    );

    // Prior answered turns give the generator conversational context.
    for turn in history.iter().filter(|t| t.answer.is_some()) {
        let _ = writeln!(prompt, "Q: {}", turn.question);
        if let Some(answer) = &turn.answer {
            let _ = writeln!(prompt, "A: {answer}\n");
        }
    }

    for (n, item) in packed.iter().enumerate() {
        let chunk = &item.chunk.chunk;
        let _ = writeln!(
            prompt,
            "[{}] {}:{}-{}",
            n + 1,
            chunk.path,
            chunk.start_line,
            chunk.end_line
        );
        prompt.push_str(&chunk.text);
        if !chunk.text.ends_with('\n') {
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    let _ = writeln!(prompt, "Question: {question}");
    prompt
}
