use loupe_retriever::RetrievalError;
use std::time::Duration;
use uuid::Uuid;

/// Failures surfaced by a research session.
///
/// Capability failures (`Planning`, `Generation`) are reported after one
/// retry of the failing step; the session is left in the `Failed` state with
/// its evidence intact. `Timeout` likewise preserves partial evidence so the
/// caller can attempt a degraded answer.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("planning capability failed")]
    Planning(#[source] anyhow::Error),

    #[error("generation capability failed")]
    Generation(#[source] anyhow::Error),

    #[error("session {session} exceeded its {budget:?} time budget")]
    Timeout { session: Uuid, budget: Duration },

    #[error("no session with id {0}")]
    UnknownSession(Uuid),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
