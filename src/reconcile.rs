//! Ingestion reconciler.
//!
//! Decides, per file, whether its content is new, unchanged, or modified
//! and applies the matching transition:
//!
//! | Ledger state | Fingerprint | Outcome |
//! |--------------|-------------|---------|
//! | no record | unknown | **Inserted** |
//! | no record | held by another identity | **Skipped** (`global`) / **Inserted** (`per_identity`) |
//! | record | same | **Skipped** |
//! | record | different | **Replaced** |
//!
//! # Ordering
//!
//! Extraction, chunking, and embedding finish before anything is written.
//! The vector store is mutated before the ledger, so a store failure leaves
//! the ledger untouched and a retry re-attempts the same transition. A
//! ledger failure after the store has been mutated is reported as
//! [`IngestError::PartiallyApplied`].
//!
//! Within the store, new chunks are inserted before the superseded version
//! is deleted, and any leftovers for the new version (from an earlier
//! partially applied attempt) are cleared first so retries never duplicate.
//!
//! # Concurrency
//!
//! Calls for the same identity are serialized by [`IdentityLocks`]; calls for
//! different identities run concurrently.

use chrono::Utc;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

use crate::chunk::chunk_text;
use crate::config::{Config, DedupPolicy};
use crate::embedding::{embed_batched, Embedder};
use crate::error::{bounded, IngestError, Result};
use crate::extract::{is_pdf, Extractor};
use crate::hasher::{hash_file, Fingerprint};
use crate::ledger::Ledger;
use crate::models::{ChunkFilter, ChunkTags, EmbeddedChunk, Outcome, ReconcileReport};
use crate::vector_store::VectorStore;

/// Per-identity async mutual exclusion.
#[derive(Default)]
pub struct IdentityLocks {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `identity`, then hold it until the
    /// guard is dropped.
    pub async fn acquire(&self, identity: &str) -> Result<OwnedMutexGuard<()>> {
        let slot = {
            let mut slots = self
                .slots
                .lock()
                .map_err(|_| IngestError::Storage("identity lock table poisoned".to_string()))?;
            // Drop slots nobody is holding or waiting on.
            slots.retain(|_, m| Arc::strong_count(m) > 1);
            slots.entry(identity.to_string()).or_default().clone()
        };
        Ok(slot.lock_owned().await)
    }
}

/// Tunables for [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub dedup_policy: DedupPolicy,
    pub max_tokens: usize,
    pub batch_size: usize,
    /// Bound for each collaborator call; `0` disables it.
    pub timeout_secs: u64,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            dedup_policy: DedupPolicy::Global,
            max_tokens: 512,
            batch_size: 64,
            timeout_secs: 300,
        }
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedup_policy: config.ingest.dedup_policy,
            max_tokens: config.chunking.max_tokens,
            batch_size: config.embedding.batch_size,
            timeout_secs: config.ingest.timeout_secs,
        }
    }
}

enum Plan {
    Skip,
    /// No ledger row, content held by another identity.
    SkipDuplicate,
    Insert,
    Replace(Fingerprint),
}

pub struct Reconciler {
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    options: ReconcileOptions,
    locks: Arc<IdentityLocks>,
}

impl Reconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn Extractor>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            ledger,
            store,
            embedder,
            extractor,
            options,
            locks: Arc::new(IdentityLocks::new()),
        }
    }

    /// Share a lock table with other reconcilers over the same ledger.
    pub fn with_locks(mut self, locks: Arc<IdentityLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Bring the ledger and vector store in line with the file at `path`.
    pub async fn reconcile(
        &self,
        identity: &str,
        source_label: &str,
        path: &Path,
    ) -> Result<ReconcileReport> {
        let _guard = self.locks.acquire(identity).await?;
        let secs = self.options.timeout_secs;

        let fingerprint = bounded("hashing", secs, fingerprint_pdf(path.to_path_buf())).await?;

        let existing = bounded("ledger lookup", secs, self.ledger.get(identity)).await?;
        let plan = match existing {
            Some(rec) if rec.content_fingerprint == fingerprint.as_str() => Plan::Skip,
            Some(rec) => Plan::Replace(Fingerprint::from_hex(rec.content_fingerprint)),
            None => {
                let held_elsewhere = match self.options.dedup_policy {
                    DedupPolicy::Global => {
                        bounded(
                            "ledger lookup",
                            secs,
                            self.ledger.lookup_by_fingerprint(&fingerprint),
                        )
                        .await?
                    }
                    DedupPolicy::PerIdentity => false,
                };
                if held_elsewhere {
                    tracing::debug!(identity, %fingerprint, "content already held by another identity");
                    Plan::SkipDuplicate
                } else {
                    Plan::Insert
                }
            }
        };

        // Without a ledger row, every chunk tagged with this identity is left
        // over from an attempt whose ledger write failed.
        let skipped = match plan {
            Plan::Skip => Some(0),
            Plan::SkipDuplicate => Some(
                bounded(
                    "vector store delete",
                    secs,
                    self.store.delete_chunks(&ChunkFilter::identity(identity)),
                )
                .await?,
            ),
            _ => None,
        };
        if let Some(chunks_removed) = skipped {
            if chunks_removed > 0 {
                tracing::warn!(identity, chunks_removed, "removed chunks not reflected in the ledger");
            }
            tracing::info!(identity, source = source_label, %fingerprint, "unchanged; skipped");
            return Ok(ReconcileReport {
                identity: identity.to_string(),
                outcome: Outcome::Skipped,
                fingerprint: fingerprint.to_string(),
                chunks_written: 0,
                chunks_removed,
            });
        }

        let tags = ChunkTags {
            identity: identity.to_string(),
            source_label: source_label.to_string(),
            content_fingerprint: fingerprint.to_string(),
        };
        let chunks = self.prepare_chunks(path, &tags).await?;

        // Store mutation
        let stale = ChunkFilter::version(identity, &fingerprint);
        bounded("vector store delete", secs, self.store.delete_chunks(&stale)).await?;
        let chunks_written =
            bounded("vector store insert", secs, self.store.insert_chunks(&chunks)).await?;

        let (outcome, chunks_removed) = match &plan {
            Plan::Replace(old) => {
                let superseded = ChunkFilter::version(identity, old);
                let removed = bounded(
                    "vector store delete",
                    secs,
                    self.store.delete_chunks(&superseded),
                )
                .await?;
                (Outcome::Replaced, removed)
            }
            _ => (Outcome::Inserted, 0),
        };

        // Ledger write
        bounded(
            "ledger upsert",
            secs,
            self.ledger
                .upsert(identity, source_label, &fingerprint, Utc::now()),
        )
        .await
        .map_err(|e| IngestError::PartiallyApplied {
            identity: identity.to_string(),
            fingerprint: fingerprint.to_string(),
            message: e.to_string(),
        })?;

        tracing::info!(
            identity,
            source = source_label,
            %fingerprint,
            %outcome,
            chunks_written,
            chunks_removed,
            "reconciled"
        );

        Ok(ReconcileReport {
            identity: identity.to_string(),
            outcome,
            fingerprint: fingerprint.to_string(),
            chunks_written,
            chunks_removed,
        })
    }

    /// Extract, chunk, and embed the file. Touches no persistent state.
    async fn prepare_chunks(&self, path: &Path, tags: &ChunkTags) -> Result<Vec<EmbeddedChunk>> {
        let secs = self.options.timeout_secs;
        let bytes = tokio::fs::read(path).await?;

        let extractor = self.extractor.clone();
        let pages = bounded("text extraction", secs, async move {
            tokio::task::spawn_blocking(move || extractor.extract_text(&bytes))
                .await
                .map_err(|e| IngestError::UnsupportedFormat(format!("extraction aborted: {}", e)))?
        })
        .await?;

        let texts: Vec<String> = pages
            .iter()
            .flat_map(|page| chunk_text(page, self.options.max_tokens))
            .collect();
        if texts.is_empty() {
            return Err(IngestError::UnsupportedFormat(format!(
                "{}: no extractable text",
                path.display()
            )));
        }

        let vectors = bounded(
            "embedding",
            secs,
            embed_batched(self.embedder.as_ref(), &texts, self.options.batch_size),
        )
        .await?;

        Ok(texts
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, embedding))| EmbeddedChunk {
                id: uuid::Uuid::new_v4().to_string(),
                chunk_index: i as i64,
                text,
                embedding,
                tags: tags.clone(),
            })
            .collect())
    }
}

/// Check that `path` is a readable PDF and hash it.
async fn fingerprint_pdf(path: PathBuf) -> Result<Fingerprint> {
    tokio::task::spawn_blocking(move || {
        let meta = std::fs::metadata(&path)
            .map_err(|e| IngestError::NotFound(format!("{}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(IngestError::NotFound(format!(
                "{}: not a regular file",
                path.display()
            )));
        }

        let mut head = Vec::with_capacity(8);
        std::fs::File::open(&path)
            .map_err(|e| IngestError::NotFound(format!("{}: {}", path.display(), e)))?
            .take(8)
            .read_to_end(&mut head)?;
        if !is_pdf(&path, &head) {
            return Err(IngestError::UnsupportedFormat(format!(
                "{}: only PDF documents are supported",
                path.display()
            )));
        }

        hash_file(&path)
    })
    .await
    .map_err(|e| IngestError::Storage(format!("hashing task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashedEmbedder;
    use crate::ledger::SqliteLedger;
    use crate::models::FileRecord;
    use crate::vector_store::InMemoryVectorStore;
    use crate::{db, migrate};
    use async_trait::async_trait;
    use chrono::DateTime;
    use tempfile::TempDir;

    /// Treats everything after the PDF header line as the page text.
    struct PlainTextPdf;

    impl Extractor for PlainTextPdf {
        fn extract_text(&self, bytes: &[u8]) -> Result<Vec<String>> {
            let text = String::from_utf8_lossy(bytes);
            let body = text.split_once('\n').map(|(_, b)| b).unwrap_or("");
            Ok(vec![body.to_string()])
        }
    }

    struct FailingUpsert(Arc<dyn Ledger>);

    #[async_trait]
    impl Ledger for FailingUpsert {
        async fn lookup_by_fingerprint(&self, fp: &Fingerprint) -> Result<bool> {
            self.0.lookup_by_fingerprint(fp).await
        }
        async fn holders_of(&self, fp: &Fingerprint) -> Result<Vec<String>> {
            self.0.holders_of(fp).await
        }
        async fn upsert(
            &self,
            _identity: &str,
            _source_label: &str,
            _fingerprint: &Fingerprint,
            _now: DateTime<Utc>,
        ) -> Result<()> {
            Err(IngestError::Storage("disk full".to_string()))
        }
        async fn get(&self, identity: &str) -> Result<Option<FileRecord>> {
            self.0.get(identity).await
        }
        async fn list(&self, source_label: Option<&str>) -> Result<Vec<FileRecord>> {
            self.0.list(source_label).await
        }
    }

    struct FailingInsert;

    #[async_trait]
    impl VectorStore for FailingInsert {
        async fn insert_chunks(&self, _chunks: &[EmbeddedChunk]) -> Result<u64> {
            Err(IngestError::Storage("store unavailable".to_string()))
        }
        async fn delete_chunks(&self, _filter: &ChunkFilter) -> Result<u64> {
            Ok(0)
        }
        async fn similarity_search(
            &self,
            _query: &[f32],
            _top_k: usize,
        ) -> Result<Vec<crate::models::ScoredChunk>> {
            Ok(Vec::new())
        }
        async fn count(&self, _filter: &ChunkFilter) -> Result<u64> {
            Ok(0)
        }
    }

    struct Harness {
        tmp: TempDir,
        ledger: Arc<SqliteLedger>,
        store: Arc<InMemoryVectorStore>,
    }

    impl Harness {
        async fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let cfg: Config = toml::from_str(&format!(
                "[db]\npath = \"{}\"\n",
                tmp.path().join("vero.sqlite").display()
            ))
            .unwrap();
            let pool = db::connect(&cfg).await.unwrap();
            migrate::apply(&pool).await.unwrap();
            Self {
                tmp,
                ledger: Arc::new(SqliteLedger::new(pool)),
                store: Arc::new(InMemoryVectorStore::new()),
            }
        }

        fn reconciler(&self, policy: DedupPolicy) -> Reconciler {
            self.reconciler_with(self.ledger.clone(), self.store.clone(), policy)
        }

        fn reconciler_with(
            &self,
            ledger: Arc<dyn Ledger>,
            store: Arc<dyn VectorStore>,
            policy: DedupPolicy,
        ) -> Reconciler {
            Reconciler::new(
                ledger,
                store,
                Arc::new(HashedEmbedder::new(64)),
                Arc::new(PlainTextPdf),
                ReconcileOptions {
                    dedup_policy: policy,
                    timeout_secs: 10,
                    ..ReconcileOptions::default()
                },
            )
        }

        fn write_pdf(&self, name: &str, body: &str) -> PathBuf {
            let path = self.tmp.path().join(name);
            std::fs::write(&path, format!("%PDF-1.4\n{}", body)).unwrap();
            path
        }

        async fn chunks_for(&self, fp: &Fingerprint) -> u64 {
            self.store.count(&ChunkFilter::fingerprint(fp)).await.unwrap()
        }
    }

    #[tokio::test]
    async fn invoice_lifecycle() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::Global);

        let path = h.write_pdf("invoice.pdf", "Invoice 42. Total due: 100 EUR.");
        let h1 = hash_file(&path).unwrap();

        let first = r.reconcile("invoice.pdf", "finance", &path).await.unwrap();
        assert_eq!(first.outcome, Outcome::Inserted);
        assert_eq!(first.fingerprint, h1.as_str());
        let rec = h.ledger.get("invoice.pdf").await.unwrap().unwrap();
        assert_eq!(rec.source_label, "finance");
        assert_eq!(rec.content_fingerprint, h1.as_str());
        assert!(rec.is_active);

        let second = r.reconcile("invoice.pdf", "finance", &path).await.unwrap();
        assert_eq!(second.outcome, Outcome::Skipped);
        assert_eq!(h.chunks_for(&h1).await, first.chunks_written);
        assert_eq!(h.ledger.get("invoice.pdf").await.unwrap().unwrap(), rec);

        let path = h.write_pdf("invoice.pdf", "Invoice 42 (corrected). Total due: 90 EUR.");
        let h2 = hash_file(&path).unwrap();
        assert_ne!(h1, h2);

        let third = r.reconcile("invoice.pdf", "finance", &path).await.unwrap();
        assert_eq!(third.outcome, Outcome::Replaced);
        assert_eq!(third.chunks_removed, first.chunks_written);
        assert_eq!(h.chunks_for(&h1).await, 0);
        assert!(h.chunks_for(&h2).await > 0);
        assert_eq!(
            h.ledger
                .get("invoice.pdf")
                .await
                .unwrap()
                .unwrap()
                .content_fingerprint,
            h2.as_str()
        );
    }

    #[tokio::test]
    async fn global_policy_skips_content_held_elsewhere() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::Global);
        let a = h.write_pdf("a.pdf", "shared body text");
        let b = h.write_pdf("b.pdf", "shared body text");

        assert_eq!(
            r.reconcile("a.pdf", "f", &a).await.unwrap().outcome,
            Outcome::Inserted
        );
        assert_eq!(
            r.reconcile("b.pdf", "f", &b).await.unwrap().outcome,
            Outcome::Skipped
        );
        assert!(h.ledger.get("b.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_skip_clears_chunks_left_by_failed_ledger_write() {
        let h = Harness::new().await;
        let a = h.write_pdf("a.pdf", "shared body text");
        let b = h.write_pdf("b.pdf", "shared body text");
        let fp = hash_file(&a).unwrap();

        let failing = h.reconciler_with(
            Arc::new(FailingUpsert(h.ledger.clone())),
            h.store.clone(),
            DedupPolicy::Global,
        );
        let err = failing.reconcile("a.pdf", "f", &a).await.unwrap_err();
        assert!(matches!(err, IngestError::PartiallyApplied { .. }));

        // Another identity claims the content before a.pdf is retried.
        let r = h.reconciler(DedupPolicy::Global);
        assert_eq!(
            r.reconcile("b.pdf", "f", &b).await.unwrap().outcome,
            Outcome::Inserted
        );

        let retry = r.reconcile("a.pdf", "f", &a).await.unwrap();
        assert_eq!(retry.outcome, Outcome::Skipped);
        assert!(retry.chunks_removed > 0);
        assert!(h.ledger.get("a.pdf").await.unwrap().is_none());
        assert_eq!(
            h.store.count(&ChunkFilter::version("a.pdf", &fp)).await.unwrap(),
            0
        );
        assert_eq!(
            h.chunks_for(&fp).await,
            h.store.count(&ChunkFilter::version("b.pdf", &fp)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn per_identity_policy_embeds_again() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::PerIdentity);
        let a = h.write_pdf("a.pdf", "shared body text");
        let b = h.write_pdf("b.pdf", "shared body text");
        let fp = hash_file(&a).unwrap();

        r.reconcile("a.pdf", "f", &a).await.unwrap();
        let report = r.reconcile("b.pdf", "f", &b).await.unwrap();
        assert_eq!(report.outcome, Outcome::Inserted);
        assert_eq!(
            h.ledger.holders_of(&fp).await.unwrap(),
            vec!["a.pdf".to_string(), "b.pdf".to_string()]
        );
        assert_eq!(h.chunks_for(&fp).await, 2);
    }

    #[tokio::test]
    async fn store_failure_leaves_ledger_unchanged() {
        let h = Harness::new().await;
        let r = h.reconciler_with(h.ledger.clone(), Arc::new(FailingInsert), DedupPolicy::Global);
        let path = h.write_pdf("a.pdf", "body");

        let err = r.reconcile("a.pdf", "f", &path).await.unwrap_err();
        assert!(matches!(err, IngestError::Storage(_)));
        assert!(h.ledger.get("a.pdf").await.unwrap().is_none());

        // A retry against a healthy store goes through as a fresh insert.
        let report = h
            .reconciler(DedupPolicy::Global)
            .reconcile("a.pdf", "f", &path)
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Inserted);
    }

    #[tokio::test]
    async fn ledger_failure_is_partially_applied() {
        let h = Harness::new().await;
        let failing: Arc<dyn Ledger> = Arc::new(FailingUpsert(h.ledger.clone()));
        let r = h.reconciler_with(failing, h.store.clone(), DedupPolicy::Global);
        let path = h.write_pdf("a.pdf", "body");
        let fp = hash_file(&path).unwrap();

        let err = r.reconcile("a.pdf", "f", &path).await.unwrap_err();
        match err {
            IngestError::PartiallyApplied {
                identity,
                fingerprint,
                ..
            } => {
                assert_eq!(identity, "a.pdf");
                assert_eq!(fingerprint, fp.as_str());
            }
            other => panic!("expected PartiallyApplied, got {other:?}"),
        }
        assert_eq!(h.chunks_for(&fp).await, 1);

        // Retrying once the ledger recovers leaves exactly one chunk set.
        let report = h
            .reconciler(DedupPolicy::Global)
            .reconcile("a.pdf", "f", &path)
            .await
            .unwrap();
        assert_eq!(report.outcome, Outcome::Inserted);
        assert_eq!(h.chunks_for(&fp).await, 1);
    }

    #[tokio::test]
    async fn concurrent_calls_on_one_identity_are_serialized() {
        let h = Harness::new().await;
        let r = Arc::new(h.reconciler(DedupPolicy::PerIdentity));
        let path = h.write_pdf("a.pdf", "body text");
        let fp = hash_file(&path).unwrap();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let r = r.clone();
                let path = path.clone();
                tokio::spawn(async move { r.reconcile("a.pdf", "f", &path).await })
            })
            .collect();

        let mut inserted = 0;
        for t in tasks {
            if t.await.unwrap().unwrap().outcome == Outcome::Inserted {
                inserted += 1;
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(h.chunks_for(&fp).await, 1);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::Global);
        let err = r
            .reconcile("gone.pdf", "f", &h.tmp.path().join("gone.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_pdf_is_unsupported() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::Global);

        let txt = h.tmp.path().join("notes.txt");
        std::fs::write(&txt, "%PDF-1.4\nlooks like a pdf").unwrap();
        let err = r.reconcile("notes.txt", "f", &txt).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));

        let fake = h.tmp.path().join("fake.pdf");
        std::fs::write(&fake, "plain text").unwrap();
        let err = r.reconcile("fake.pdf", "f", &fake).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert!(h.ledger.list(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_document_is_unsupported() {
        let h = Harness::new().await;
        let r = h.reconciler(DedupPolicy::Global);
        let path = h.write_pdf("blank.pdf", "   \n\n  ");
        let err = r.reconcile("blank.pdf", "f", &path).await.unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
        assert!(h.ledger.get("blank.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn identity_locks_release_on_drop() {
        let locks = IdentityLocks::new();
        let g = locks.acquire("a").await.unwrap();
        drop(g);
        let _again = locks.acquire("a").await.unwrap();
        let _other = locks.acquire("b").await.unwrap();
    }
}
