//! loupe-retriever: the indexing and search core of the loupe workspace.
//!
//! The index is an immutable [`IndexSnapshot`] swapped atomically by a
//! single-writer [`Indexer`]; readers pin a snapshot and search it with a
//! [`Retriever`] while writes proceed. A [`FileScanner`] discovers files to
//! index, and the optional [`SnapshotStore`] persists snapshots across
//! process restarts.

pub mod indexer;
pub mod retriever;
pub mod scanner;
pub mod snapshot;
pub mod storage;

pub use indexer::{IndexDelta, Indexer, IndexerConfig};
pub use retriever::{RetrievalError, Retriever, RetrieverConfig, SearchFilter, SearchHit};
pub use scanner::{FileScanner, IgnoreScanner, ScanOutcome, ScannedFile, SkipReason, SkippedFile};
pub use snapshot::{IndexSnapshot, IndexedChunk, SnapshotBuilder};
pub use storage::{IndexMeta, SnapshotStore, SqliteStore};
