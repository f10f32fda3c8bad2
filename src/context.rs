//! Application context.
//!
//! [`AppContext`] owns the database pool and every collaborator handle. It is
//! opened once at process start, passed to whatever needs a [`Reconciler`]
//! or [`Retriever`], and closed on shutdown. Nothing in the crate opens a
//! connection behind the caller's back.

use anyhow::{Context as _, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::extract::{Extractor, PdfExtractor};
use crate::ledger::{Ledger, SqliteLedger};
use crate::reconcile::{IdentityLocks, ReconcileOptions, Reconciler};
use crate::retrieval::Retriever;
use crate::vector_store::{SqliteVectorStore, VectorStore};
use crate::{db, migrate};

pub struct AppContext {
    config: Config,
    pool: SqlitePool,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    locks: Arc<IdentityLocks>,
}

impl AppContext {
    /// Connect to the database, apply migrations, and build the
    /// collaborators selected by `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
        migrate::apply(&pool).await?;
        let embedder: Arc<dyn Embedder> = Arc::from(create_embedder(&config.embedding)?);

        Ok(Self {
            config: config.clone(),
            ledger: Arc::new(SqliteLedger::new(pool.clone())),
            store: Arc::new(SqliteVectorStore::new(pool.clone())),
            embedder,
            extractor: Arc::new(PdfExtractor),
            locks: Arc::new(IdentityLocks::new()),
            pool,
        })
    }

    /// Replace the embedding provider, e.g. with a deterministic one in tests.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        self.ledger.clone()
    }

    pub fn store(&self) -> Arc<dyn VectorStore> {
        self.store.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    /// A reconciler sharing this context's per-identity lock table.
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.ledger.clone(),
            self.store.clone(),
            self.embedder.clone(),
            self.extractor.clone(),
            ReconcileOptions::from_config(&self.config),
        )
        .with_locks(self.locks.clone())
    }

    pub fn retriever(&self) -> Retriever {
        Retriever::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.retrieval.timeout_secs,
        )
    }

    /// Close the database pool. Handles cloned out of the context fail
    /// afterwards.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkFilter;
    use tempfile::TempDir;

    fn config(tmp: &TempDir) -> Config {
        toml::from_str(&format!(
            r#"
[db]
path = "{}"

[embedding]
provider = "hashed"
dims = 32
"#,
            tmp.path().join("data/vero.sqlite").display()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn open_creates_schema_and_wires_collaborators() {
        let tmp = TempDir::new().unwrap();
        let ctx = AppContext::open(&config(&tmp)).await.unwrap();

        assert!(ctx.ledger().list(None).await.unwrap().is_empty());
        assert_eq!(ctx.store().count(&ChunkFilter::default()).await.unwrap(), 0);
        assert_eq!(ctx.embedder().model_name(), "hashed");
        assert_eq!(ctx.embedder().dims(), 32);
        ctx.close().await;

        assert!(tmp.path().join("data/vero.sqlite").exists());
    }

    #[tokio::test]
    async fn state_survives_close_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let pdf = tmp.path().join("broken.pdf");
        std::fs::write(&pdf, b"%PDF-1.4\nnot really a pdf").unwrap();

        let ctx = AppContext::open(&config(&tmp)).await.unwrap();
        let ledger = ctx.ledger();
        let fp = crate::hasher::Fingerprint::from_hex("abc");
        ledger
            .upsert("a.pdf", "finance", &fp, chrono::Utc::now())
            .await
            .unwrap();
        // Unparseable PDF bodies never reach the ledger.
        assert!(ctx
            .reconciler()
            .reconcile("broken.pdf", "finance", &pdf)
            .await
            .is_err());
        ctx.close().await;

        let ctx = AppContext::open(&config(&tmp)).await.unwrap();
        let rec = ctx.ledger().get("a.pdf").await.unwrap().unwrap();
        assert_eq!(rec.content_fingerprint, "abc");
        assert!(ctx.ledger().get("broken.pdf").await.unwrap().is_none());
        ctx.close().await;
    }
}
