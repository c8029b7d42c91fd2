//! loupe-embed: the embedding capability seam.
//!
//! Defines the [`EmbeddingProvider`] trait the indexer and retriever consume,
//! the error taxonomy with its transient/terminal split, and a deterministic
//! hashing provider for offline use and tests. Which model actually backs
//! production embeddings is the caller's choice; nothing here is hard-wired.

pub mod error;
pub mod hash;
pub mod provider;

pub use error::{EmbedError, Result};
pub use hash::HashEmbedProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, cosine_similarity};
