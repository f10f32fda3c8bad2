//! Error taxonomy for the ingestion and retrieval core.
//!
//! The core (hasher, ledger, reconciler, retrieval) returns
//! [`IngestError`]; the CLI and adapters wrap it in `anyhow` where a
//! typed error is no longer useful.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// The input file does not exist or is not readable.
    #[error("not found: {0}")]
    NotFound(String),

    /// The input is not a recognized document type. Only PDF is supported.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Ledger or vector-store I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Malformed caller arguments (e.g. `top_k <= 0`).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A collaborator call exceeded its time bound.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The vector store was mutated but the ledger write failed; the stored
    /// chunks for `fingerprint` are not reflected in the ledger.
    #[error("partially applied for '{identity}' ({fingerprint}): {message}")]
    PartiallyApplied {
        identity: String,
        fingerprint: String,
        message: String,
    },

    /// The embedding provider failed or returned a malformed response.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// The document source (drive, local folder) failed.
    #[error("source error: {0}")]
    Source(String),
}

impl IngestError {
    /// Machine-readable code used by the HTTP and tool adapters.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::NotFound(_) => "not_found",
            IngestError::UnsupportedFormat(_) => "unsupported_format",
            IngestError::Storage(_) => "storage_error",
            IngestError::InvalidArgument(_) => "bad_request",
            IngestError::Timeout { .. } => "timeout",
            IngestError::PartiallyApplied { .. } => "partially_applied",
            IngestError::Embedding(_) => "embedding_error",
            IngestError::Source(_) => "source_error",
        }
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        IngestError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                IngestError::NotFound(err.to_string())
            }
            _ => IngestError::Storage(err.to_string()),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Run `fut` with an upper bound of `secs` seconds.
///
/// A bound of `0` disables the limit.
pub async fn bounded<T, F>(operation: &str, secs: u64, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if secs == 0 {
        return fut.await;
    }
    match tokio::time::timeout(std::time::Duration::from_secs(secs), fut).await {
        Ok(res) => res,
        Err(_) => Err(IngestError::Timeout {
            operation: operation.to_string(),
            secs,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_passes_through_result() {
        let v = bounded("noop", 5, async { Ok::<_, IngestError>(7) })
            .await
            .unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test]
    async fn bounded_reports_timeout() {
        let err = bounded("slow call", 1, async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok::<_, IngestError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::Timeout { secs: 1, .. }));
        assert_eq!(err.code(), "timeout");
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn missing_file_maps_to_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(matches!(IngestError::from(io), IngestError::NotFound(_)));
    }
}
