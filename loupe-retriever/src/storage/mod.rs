//! Optional snapshot persistence.
//!
//! The in-memory snapshot is the source of truth; a [`SnapshotStore`] lets a
//! process save the index on shutdown and restore it on startup instead of
//! re-embedding the whole codebase. The store records which provider and
//! dimension produced the embeddings so callers can reject a snapshot built
//! by a different provider.

mod sqlite_store;

pub use sqlite_store::SqliteStore;

use crate::snapshot::IndexSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Provenance for a persisted snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub generation: u64,
    /// `EmbeddingProvider::provider_name` of the provider that built it.
    pub provider: String,
    pub dimension: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable storage for a whole snapshot. A save replaces any previous
/// snapshot; there is no incremental form.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &IndexSnapshot, provider: &str, dimension: usize)
    -> anyhow::Result<()>;

    /// Restore the stored snapshot, or `None` when nothing was saved yet.
    async fn load(&self) -> anyhow::Result<Option<(IndexSnapshot, IndexMeta)>>;
}
