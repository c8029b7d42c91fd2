//! loupe-context: chunk data model and source-file chunking.
//!
//! Turns raw file content into addressable [`Chunk`]s with content-derived
//! identities, ready for embedding and retrieval by the rest of the loupe
//! workspace.

pub mod chunk;
pub mod chunker;

pub use chunk::{Chunk, ChunkId, ChunkKind, Language};
pub use chunker::{Chunker, ChunkerConfig, Chunks};
