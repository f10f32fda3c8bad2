//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the only surface the reconciler and the
//! retrieval facade see. It needs three things from a backend: bulk insert of
//! embedded chunks, exact-match deletion by metadata, and top-k similarity
//! search.
//!
//! Two backends ship with the crate:
//!
//! | Backend | Storage | Search |
//! |---------|---------|--------|
//! | [`SqliteVectorStore`] | `chunks` table, vectors as little-endian BLOBs | brute-force cosine |
//! | [`InMemoryVectorStore`] | `RwLock<Vec<_>>` | brute-force cosine |

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::sync::RwLock;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{IngestError, Result};
use crate::models::{ChunkFilter, ChunkTags, EmbeddedChunk, ScoredChunk};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store all `chunks` atomically: either every chunk lands or none does.
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<u64>;

    /// Remove every chunk matching `filter`. Returns the number removed.
    async fn delete_chunks(&self, filter: &ChunkFilter) -> Result<u64>;

    /// Up to `top_k` chunks ordered by non-increasing similarity to `query`.
    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>>;

    /// Number of chunks matching `filter`.
    async fn count(&self, filter: &ChunkFilter) -> Result<u64>;
}

fn sort_and_truncate(mut hits: Vec<ScoredChunk>, top_k: usize) -> Vec<ScoredChunk> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

// ============ SQLite ============

/// SQLite-backed [`VectorStore`] sharing the ledger's database.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const FILTER_CLAUSE: &str = "(?1 IS NULL OR identity = ?1) \
     AND (?2 IS NULL OR source_label = ?2) \
     AND (?3 IS NULL OR content_fingerprint = ?3)";

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, identity, source_label, content_fingerprint, chunk_index, text, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.tags.identity)
            .bind(&chunk.tags.source_label)
            .bind(&chunk.tags.content_fingerprint)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(vec_to_blob(&chunk.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(chunks.len() as u64)
    }

    async fn delete_chunks(&self, filter: &ChunkFilter) -> Result<u64> {
        let result = sqlx::query(&format!("DELETE FROM chunks WHERE {}", FILTER_CLAUSE))
            .bind(&filter.identity)
            .bind(&filter.source_label)
            .bind(&filter.content_fingerprint)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query(
            "SELECT identity, source_label, content_fingerprint, text, embedding FROM chunks",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.try_get("embedding")?;
            let vector = blob_to_vec(&blob);
            if vector.len() != query.len() {
                return Err(IngestError::Storage(format!(
                    "stored vector has {} dims but query has {}; re-ingest after changing embedding models",
                    vector.len(),
                    query.len()
                )));
            }
            hits.push(ScoredChunk {
                text: row.try_get("text")?,
                tags: ChunkTags {
                    identity: row.try_get("identity")?,
                    source_label: row.try_get("source_label")?,
                    content_fingerprint: row.try_get("content_fingerprint")?,
                },
                score: cosine_similarity(query, &vector) as f64,
            });
        }

        Ok(sort_and_truncate(hits, top_k))
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM chunks WHERE {}", FILTER_CLAUSE))
            .bind(&filter.identity)
            .bind(&filter.source_label)
            .bind(&filter.content_fingerprint)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

// ============ In-memory ============

/// In-memory [`VectorStore`] for tests and throwaway indexes.
#[derive(Default)]
pub struct InMemoryVectorStore {
    chunks: RwLock<Vec<EmbeddedChunk>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> IngestError {
    IngestError::Storage("in-memory store lock poisoned".to_string())
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<u64> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        stored.extend(chunks.iter().cloned());
        Ok(chunks.len() as u64)
    }

    async fn delete_chunks(&self, filter: &ChunkFilter) -> Result<u64> {
        let mut stored = self.chunks.write().map_err(poisoned)?;
        let before = stored.len();
        stored.retain(|c| !filter.matches(&c.tags));
        Ok((before - stored.len()) as u64)
    }

    async fn similarity_search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>> {
        let stored = self.chunks.read().map_err(poisoned)?;
        let hits = stored
            .iter()
            .map(|c| ScoredChunk {
                text: c.text.clone(),
                tags: c.tags.clone(),
                score: cosine_similarity(query, &c.embedding) as f64,
            })
            .collect();
        Ok(sort_and_truncate(hits, top_k))
    }

    async fn count(&self, filter: &ChunkFilter) -> Result<u64> {
        let stored = self.chunks.read().map_err(poisoned)?;
        Ok(stored.iter().filter(|c| filter.matches(&c.tags)).count() as u64)
    }
}
