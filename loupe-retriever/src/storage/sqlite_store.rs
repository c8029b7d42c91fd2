//! SQLite-backed [`SnapshotStore`].

use super::{IndexMeta, SnapshotStore};
use crate::snapshot::{IndexSnapshot, IndexedChunk, SnapshotBuilder};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use half::f16;
use loupe_context::{Chunk, ChunkId, ChunkKind, Language};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::info;

/// Persists snapshots to a single SQLite file.
///
/// Embeddings are stored as raw little-endian `f16` bytes; chunk ids are the
/// 32-byte blake3 hashes used as primary keys. Saves replace the whole
/// snapshot inside one transaction, so a crashed save leaves the previous
/// snapshot intact.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Full)
                .page_size(1 << 16)
                .optimize_on_close(true, 1 << 10),
        )
        .await
        .with_context(|| format!("opening index database {}", db_path.display()))?;
        Self::new_with_pool(pool).await
    }

    /// In-memory database, for tests.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id BLOB PRIMARY KEY,
                relative_path TEXT NOT NULL,
                symbol TEXT,
                line_start INTEGER NOT NULL,
                line_end INTEGER NOT NULL,
                content TEXT NOT NULL,
                kind TEXT NOT NULL,
                language TEXT NOT NULL,
                embedding BLOB,
                embedding_failed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                generation INTEGER NOT NULL,
                provider TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(relative_path)")
            .execute(pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteStore {
    async fn save(
        &self,
        snapshot: &IndexSnapshot,
        provider: &str,
        dimension: usize,
    ) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        for entry in snapshot.entries() {
            let chunk = &entry.chunk;
            let embedding_bytes = entry
                .embedding
                .as_ref()
                .map(|e| bytemuck::cast_slice::<f16, u8>(e));
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, relative_path, symbol, line_start, line_end, content,
                     kind, language, embedding, embedding_failed)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&chunk.id[..])
            .bind(&chunk.path)
            .bind(&chunk.symbol)
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(&chunk.text)
            .bind(chunk.kind.name())
            .bind(chunk.language.name())
            .bind(embedding_bytes)
            .bind(entry.embedding_failed as i64)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO index_meta (id, generation, provider, dimension, created_at, updated_at)
            VALUES (1, ?1, ?2, ?3, ?4, ?4)
            ON CONFLICT(id) DO UPDATE SET
                generation = excluded.generation,
                provider = excluded.provider,
                dimension = excluded.dimension,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(snapshot.generation() as i64)
        .bind(provider)
        .bind(dimension as i64)
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(
            generation = snapshot.generation(),
            chunks = snapshot.entries().len(),
            "snapshot saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<(IndexSnapshot, IndexMeta)>> {
        let meta_row = sqlx::query(
            "SELECT generation, provider, dimension, created_at, updated_at FROM index_meta WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(meta_row) = meta_row else {
            return Ok(None);
        };

        let created_at: String = meta_row.get("created_at");
        let updated_at: String = meta_row.get("updated_at");
        let meta = IndexMeta {
            generation: meta_row.get::<i64, _>("generation") as u64,
            provider: meta_row.get("provider"),
            dimension: meta_row.get::<i64, _>("dimension") as usize,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        };

        let rows = sqlx::query(
            r#"
            SELECT id, relative_path, symbol, line_start, line_end, content,
                   kind, language, embedding, embedding_failed
            FROM chunks ORDER BY relative_path, line_start
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut builder = SnapshotBuilder::new().with_generation(meta.generation);
        for row in rows {
            let id_bytes: Vec<u8> = row.get("id");
            let id: ChunkId = id_bytes
                .try_into()
                .map_err(|_| anyhow!("chunk id is not 32 bytes"))?;
            let embedding_bytes: Option<Vec<u8>> = row.get("embedding");
            let embedding =
                embedding_bytes.map(|bytes| bytemuck::cast_slice::<u8, f16>(&bytes).to_vec());

            let chunk = Chunk {
                id,
                path: row.get("relative_path"),
                symbol: row.get("symbol"),
                start_line: row.get::<i64, _>("line_start") as usize,
                end_line: row.get::<i64, _>("line_end") as usize,
                text: row.get("content"),
                kind: ChunkKind::from_name(&row.get::<String, _>("kind")),
                language: Language::from_name(&row.get::<String, _>("language")),
            };
            builder.insert(IndexedChunk {
                chunk,
                embedding,
                embedding_failed: row.get::<i64, _>("embedding_failed") != 0,
            });
        }

        let snapshot = builder.build();
        info!(
            generation = snapshot.generation(),
            chunks = snapshot.entries().len(),
            "snapshot restored"
        );
        Ok(Some((snapshot, meta)))
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("parsing stored timestamp {raw:?}"))?
        .with_timezone(&Utc))
}
