//! Core data models used throughout Vero.
//!
//! These types represent ledger rows, stored chunks, and the results that
//! flow through the ingestion and retrieval paths.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hasher::Fingerprint;

/// One row of the processed-file ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    /// Unique key for a file within the ingestion scope (its file name).
    pub identity: String,
    /// Grouping label, normally the originating folder id.
    pub source_label: String,
    /// Hex SHA-256 of the file bytes at last successful ingestion.
    pub content_fingerprint: String,
    pub processed_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Metadata carried by every stored chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTags {
    pub identity: String,
    pub source_label: String,
    pub content_fingerprint: String,
}

/// A unit of extracted text plus its embedding, ready for the vector store.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub id: String,
    pub chunk_index: i64,
    pub text: String,
    pub embedding: Vec<f32>,
    pub tags: ChunkTags,
}

/// Exact-match metadata filter for chunk deletion and counting.
///
/// Unset fields match anything; an all-`None` filter matches every chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub identity: Option<String>,
    pub source_label: Option<String>,
    pub content_fingerprint: Option<String>,
}

impl ChunkFilter {
    /// Chunks contributed by one version (`fingerprint`) of one file.
    pub fn version(identity: &str, fingerprint: &Fingerprint) -> Self {
        Self {
            identity: Some(identity.to_string()),
            source_label: None,
            content_fingerprint: Some(fingerprint.as_str().to_string()),
        }
    }

    /// Every chunk of one file, whatever its version.
    pub fn identity(identity: &str) -> Self {
        Self {
            identity: Some(identity.to_string()),
            ..Self::default()
        }
    }

    pub fn fingerprint(fingerprint: &Fingerprint) -> Self {
        Self {
            content_fingerprint: Some(fingerprint.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn source(source_label: &str) -> Self {
        Self {
            source_label: Some(source_label.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, tags: &ChunkTags) -> bool {
        self.identity.as_ref().map_or(true, |v| *v == tags.identity)
            && self
                .source_label
                .as_ref()
                .map_or(true, |v| *v == tags.source_label)
            && self
                .content_fingerprint
                .as_ref()
                .map_or(true, |v| *v == tags.content_fingerprint)
    }
}

/// A chunk returned by similarity search, with the store's raw score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub text: String,
    pub tags: ChunkTags,
    pub score: f64,
}

/// A retrieval result as handed to API and tool consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub text: String,
    pub source_label: String,
    pub identity: String,
    pub score: f64,
}

/// Wire shape of a search hit in the HTTP API and tool responses.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct ChunkResult {
    pub text: String,
    /// Source label (folder id) the chunk was ingested under.
    pub source: String,
    /// Ledger identity of the file the chunk came from.
    pub file_name: String,
}

impl From<SearchHit> for ChunkResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            text: hit.text,
            source: hit.source_label,
            file_name: hit.identity,
        }
    }
}

/// Decision taken by the reconciler for one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Inserted,
    Skipped,
    Replaced,
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Outcome::Inserted => "inserted",
            Outcome::Skipped => "skipped",
            Outcome::Replaced => "replaced",
        };
        f.write_str(s)
    }
}

/// What a single reconcile call did.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub identity: String,
    pub outcome: Outcome,
    pub fingerprint: String,
    pub chunks_written: u64,
    pub chunks_removed: u64,
}

/// A file listed by a [`Source`](crate::source::Source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Source-specific id used for download (drive file id, or path).
    pub id: String,
    /// File name; becomes the ledger identity.
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(identity: &str, source: &str, fp: &str) -> ChunkTags {
        ChunkTags {
            identity: identity.to_string(),
            source_label: source.to_string(),
            content_fingerprint: fp.to_string(),
        }
    }

    #[test]
    fn version_filter_matches_only_that_version() {
        let f = ChunkFilter::version("invoice.pdf", &Fingerprint::from_hex("h1"));
        assert!(f.matches(&tags("invoice.pdf", "finance", "h1")));
        assert!(!f.matches(&tags("invoice.pdf", "finance", "h2")));
        assert!(!f.matches(&tags("receipt.pdf", "finance", "h1")));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(ChunkFilter::default().matches(&tags("a", "b", "c")));
    }
}
