//! loupe-research: the agentic question-answering loop over an indexed
//! codebase.
//!
//! A [`ResearchEngine`] indexes source files through loupe-context and
//! loupe-retriever, then answers questions by iterating plan → retrieve →
//! evaluate under hard iteration and time bounds, handing the accumulated
//! evidence to a synthesizer for a cited answer. Planning, generation, and
//! embedding are injected capabilities, so the whole loop is deterministic
//! under test doubles.

pub mod capabilities;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod synthesizer;

pub use capabilities::{Generator, PlanOutcome, Planner};
pub use engine::{EngineConfig, IndexStats, ResearchEngine};
pub use error::ResearchError;
pub use orchestrator::{Orchestrator, OrchestratorConfig, ResearchOutcome};
pub use planner::HeuristicPlanner;
pub use session::{Evidence, EvidenceItem, Session, SessionStatus, Turn};
pub use synthesizer::{Answer, Citation, INSUFFICIENT_EVIDENCE, Synthesizer, SynthesizerConfig};
