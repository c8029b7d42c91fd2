//! The research loop.
//!
//! One question is answered by a bounded plan/retrieve/evaluate cycle:
//! planning derives the next query (the first is the raw question),
//! retrieving folds ranked chunks into the session's evidence, and
//! evaluating applies the stop rules in order: planner sufficiency, the
//! iteration cap, then a zero-yield round against empty evidence. The loop
//! therefore terminates for any planner behavior, including one that never
//! signals sufficiency. A failed planning step is retried once before the
//! session fails.

use crate::capabilities::{PlanOutcome, Planner};
use crate::error::ResearchError;
use crate::session::{Session, SessionStatus};
use loupe_retriever::{IndexSnapshot, Retriever, SearchFilter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retrieval rounds allowed per `ask` call.
    pub max_iterations: u32,
    /// Wall-clock budget for one `ask` call; enforced by the engine.
    pub session_timeout: Duration,
    /// Results requested per retrieval round.
    pub retrieve_k: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            session_timeout: Duration::from_secs(120),
            retrieve_k: 8,
        }
    }
}

/// Terminal disposition of one research run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResearchOutcome {
    /// Evidence is ready for the synthesizer.
    Synthesize,
    /// The index offered nothing for this question.
    Exhausted,
}

pub struct Orchestrator {
    planner: Arc<dyn Planner>,
    retriever: Retriever,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(planner: Arc<dyn Planner>, retriever: Retriever, config: OrchestratorConfig) -> Self {
        Self {
            planner,
            retriever,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run the loop for `question`, accumulating evidence into `session`.
    ///
    /// On a capability failure the session is marked failed and the error
    /// returned; evidence gathered so far stays on the session either way.
    pub async fn research(
        &self,
        snapshot: &IndexSnapshot,
        session: &mut Session,
        question: &str,
    ) -> Result<ResearchOutcome, ResearchError> {
        let start_iteration = session.iteration_count;
        loop {
            let outcome = match self.plan_with_retry(session, question).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    session.status = SessionStatus::Failed;
                    return Err(error);
                }
            };

            let query = match outcome {
                PlanOutcome::Sufficient => {
                    debug!(session = %session.id, "planner signaled sufficiency");
                    return Ok(ResearchOutcome::Synthesize);
                }
                PlanOutcome::NextQuery(query) => query,
            };

            let hits = self
                .retriever
                .retrieve(snapshot, &query, self.config.retrieve_k, &SearchFilter::default())
                .await?;
            let new_chunks = session.evidence.absorb(&query, hits);
            session.iteration_count += 1;
            info!(
                session = %session.id,
                query,
                new_chunks,
                evidence = session.evidence.len(),
                "retrieval round complete"
            );

            let rounds = session.iteration_count - start_iteration;
            if rounds >= self.config.max_iterations {
                return if session.evidence.is_empty() {
                    session.status = SessionStatus::Exhausted;
                    Ok(ResearchOutcome::Exhausted)
                } else {
                    Ok(ResearchOutcome::Synthesize)
                };
            }
            if new_chunks == 0 && session.evidence.is_empty() {
                session.status = SessionStatus::Exhausted;
                return Ok(ResearchOutcome::Exhausted);
            }
            // Zero yield against existing evidence loops back to planning,
            // which may still conclude sufficiency.
        }
    }

    async fn plan_with_retry(
        &self,
        session: &Session,
        question: &str,
    ) -> Result<PlanOutcome, ResearchError> {
        match self
            .planner
            .plan(question, &session.history, &session.evidence)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                warn!(%error, "planning failed, retrying once");
                self.planner
                    .plan(question, &session.history, &session.evidence)
                    .await
                    .map_err(ResearchError::Planning)
            }
        }
    }
}
