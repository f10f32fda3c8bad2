//! Retrieval facade: query text in, ranked and normalized chunks out.
//!
//! Every call embeds the query and runs a fresh similarity search; nothing is
//! cached and results are returned in the order the store ranked them.
//! Chunk text is normalized to NFKC so consumers see one canonical form for
//! ligatures, full-width characters, and compatibility code points that PDF
//! extraction tends to produce.

use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

use crate::embedding::{embed_query, Embedder};
use crate::error::{bounded, IngestError, Result};
use crate::models::SearchHit;
use crate::vector_store::VectorStore;

pub struct Retriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    timeout_secs: u64,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>, timeout_secs: u64) -> Self {
        Self {
            store,
            embedder,
            timeout_secs,
        }
    }

    /// Up to `top_k` hits ordered by non-increasing score.
    ///
    /// Fails with [`IngestError::InvalidArgument`] when `top_k <= 0` or the
    /// query is blank. Collaborator failures are reported, never turned into
    /// an empty result.
    pub async fn search(&self, query: &str, top_k: i64) -> Result<Vec<SearchHit>> {
        if top_k <= 0 {
            return Err(IngestError::InvalidArgument(format!(
                "top_k must be a positive integer, got {}",
                top_k
            )));
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(IngestError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }

        bounded("search", self.timeout_secs, async {
            let vector = embed_query(self.embedder.as_ref(), query).await?;
            let scored = self
                .store
                .similarity_search(&vector, top_k as usize)
                .await?;

            Ok(scored
                .into_iter()
                .map(|c| SearchHit {
                    text: c.text.nfkc().collect(),
                    source_label: c.tags.source_label,
                    identity: c.tags.identity,
                    score: c.score,
                })
                .collect())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledEmbedder, HashedEmbedder};
    use crate::models::{ChunkTags, EmbeddedChunk};
    use crate::vector_store::InMemoryVectorStore;

    async fn seeded(texts: &[(&str, &str)]) -> Retriever {
        let embedder = Arc::new(HashedEmbedder::new(128));
        let store = Arc::new(InMemoryVectorStore::new());
        let bodies: Vec<String> = texts.iter().map(|(_, t)| t.to_string()).collect();
        let vectors = embedder.embed(&bodies).await.unwrap();
        let chunks: Vec<EmbeddedChunk> = texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, ((identity, text), embedding))| EmbeddedChunk {
                id: format!("c{}", i),
                chunk_index: 0,
                text: text.to_string(),
                embedding,
                tags: ChunkTags {
                    identity: identity.to_string(),
                    source_label: "finance".to_string(),
                    content_fingerprint: format!("h{}", i),
                },
            })
            .collect();
        store.insert_chunks(&chunks).await.unwrap();
        Retriever::new(store, embedder, 10)
    }

    #[tokio::test]
    async fn returns_at_most_top_k_in_score_order() {
        let r = seeded(&[
            ("a.pdf", "beverage sales rose in march"),
            ("b.pdf", "parking rules for visitors"),
            ("c.pdf", "beverage pricing"),
            ("d.pdf", "sales team offsite"),
            ("e.pdf", "quarterly beverage sales summary"),
        ])
        .await;

        let hits = r.search("beverage sales", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        for pair in hits.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        assert_ne!(hits[0].identity, "b.pdf");
    }

    #[tokio::test]
    async fn non_positive_top_k_is_rejected() {
        let r = seeded(&[("a.pdf", "text")]).await;
        for k in [0, -1] {
            let err = r.search("text", k).await.unwrap_err();
            assert!(matches!(err, IngestError::InvalidArgument(_)));
        }
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let r = seeded(&[("a.pdf", "text")]).await;
        let err = r.search("   ", 3).await.unwrap_err();
        assert!(matches!(err, IngestError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn text_is_nfkc_normalized() {
        // U+FB01 LATIN SMALL LIGATURE FI, U+FF21 FULLWIDTH LATIN CAPITAL A
        let r = seeded(&[("a.pdf", "\u{FB01}nal \u{FF21}udit")]).await;
        let hits = r.search("final audit", 1).await.unwrap();
        assert_eq!(hits[0].text, "final Audit");
        assert_eq!(hits[0].source_label, "finance");
    }

    #[tokio::test]
    async fn empty_store_returns_no_hits() {
        let r = Retriever::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(HashedEmbedder::new(16)),
            10,
        );
        assert!(r.search("anything", 3).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn embedder_failure_is_an_error_not_empty() {
        let r = Retriever::new(
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(DisabledEmbedder),
            10,
        );
        let err = r.search("anything", 3).await.unwrap_err();
        assert!(matches!(err, IngestError::Embedding(_)));
    }
}
