//! Processed-file ledger.
//!
//! Durable record of which files have been ingested and at what content
//! version. The ledger is the reconciler's source of truth for "have we
//! seen this before": one row per identity, keyed by file name, carrying the
//! fingerprint of the version whose chunks are live in the vector store.
//!
//! Every operation is a single SQL statement, so a partially written row is
//! never observable.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::{IngestError, Result};
use crate::hasher::Fingerprint;
use crate::models::FileRecord;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// True if any record currently carries `fingerprint`.
    async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<bool>;

    /// Identities whose record carries `fingerprint`.
    async fn holders_of(&self, fingerprint: &Fingerprint) -> Result<Vec<String>>;

    /// Create or overwrite the record for `identity` and mark it active.
    async fn upsert(
        &self,
        identity: &str,
        source_label: &str,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<()>;

    async fn get(&self, identity: &str) -> Result<Option<FileRecord>>;

    /// All records, optionally restricted to one source label. Unordered.
    async fn list(&self, source_label: Option<&str>) -> Result<Vec<FileRecord>>;
}

/// SQLite implementation of [`Ledger`] over the `processed_files` table.
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| IngestError::Storage(format!("corrupt processed_at '{}': {}", raw, e)))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord> {
    let processed_at: String = row.try_get("processed_at")?;
    let is_active: i64 = row.try_get("is_active")?;
    Ok(FileRecord {
        identity: row.try_get("identity")?,
        source_label: row.try_get("source_label")?,
        content_fingerprint: row.try_get("content_fingerprint")?,
        processed_at: decode_ts(&processed_at)?,
        is_active: is_active != 0,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn lookup_by_fingerprint(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM processed_files WHERE content_fingerprint = ?",
        )
        .bind(fingerprint.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn holders_of(&self, fingerprint: &Fingerprint) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT identity FROM processed_files WHERE content_fingerprint = ? ORDER BY identity",
        )
        .bind(fingerprint.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn upsert(
        &self,
        identity: &str,
        source_label: &str,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_files (identity, source_label, content_fingerprint, processed_at, is_active)
            VALUES (?, ?, ?, ?, 1)
            ON CONFLICT(identity) DO UPDATE SET
                source_label = excluded.source_label,
                content_fingerprint = excluded.content_fingerprint,
                processed_at = excluded.processed_at,
                is_active = 1
            "#,
        )
        .bind(identity)
        .bind(source_label)
        .bind(fingerprint.as_str())
        .bind(encode_ts(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, identity: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query(
            "SELECT identity, source_label, content_fingerprint, processed_at, is_active FROM processed_files WHERE identity = ?",
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self, source_label: Option<&str>) -> Result<Vec<FileRecord>> {
        let rows = match source_label {
            Some(label) => {
                sqlx::query(
                    "SELECT identity, source_label, content_fingerprint, processed_at, is_active FROM processed_files WHERE source_label = ?",
                )
                .bind(label)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT identity, source_label, content_fingerprint, processed_at, is_active FROM processed_files",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(row_to_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn open(tmp: &TempDir) -> SqliteLedger {
        let cfg: Config = toml::from_str(&format!(
            "[db]\npath = \"{}\"\n",
            tmp.path().join("ledger.sqlite").display()
        ))
        .unwrap();
        let pool = db::connect(&cfg).await.unwrap();
        migrate::apply(&pool).await.unwrap();
        SqliteLedger::new(pool)
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp).await;
        let now = Utc::now();
        let fp = Fingerprint::from_hex("h1");

        ledger.upsert("invoice.pdf", "finance", &fp, now).await.unwrap();
        let rec = ledger.get("invoice.pdf").await.unwrap().unwrap();

        assert_eq!(
            rec,
            FileRecord {
                identity: "invoice.pdf".into(),
                source_label: "finance".into(),
                content_fingerprint: "h1".into(),
                processed_at: now,
                is_active: true,
            }
        );
    }

    #[tokio::test]
    async fn upsert_overwrites_and_keeps_one_row() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp).await;
        let now = Utc::now();

        ledger
            .upsert("invoice.pdf", "finance", &Fingerprint::from_hex("h1"), now)
            .await
            .unwrap();
        ledger
            .upsert("invoice.pdf", "finance", &Fingerprint::from_hex("h2"), now)
            .await
            .unwrap();

        let all = ledger.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content_fingerprint, "h2");
        assert!(!ledger
            .lookup_by_fingerprint(&Fingerprint::from_hex("h1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp).await;
        let now = Utc::now();
        let fp = Fingerprint::from_hex("h1");

        ledger.upsert("a.pdf", "f", &fp, now).await.unwrap();
        let first = ledger.get("a.pdf").await.unwrap();
        ledger.upsert("a.pdf", "f", &fp, now).await.unwrap();
        assert_eq!(first, ledger.get("a.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn fingerprint_lookup_spans_identities() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp).await;
        let fp = Fingerprint::from_hex("shared");

        ledger.upsert("a.pdf", "f1", &fp, Utc::now()).await.unwrap();
        ledger.upsert("b.pdf", "f2", &fp, Utc::now()).await.unwrap();

        assert!(ledger.lookup_by_fingerprint(&fp).await.unwrap());
        assert_eq!(
            ledger.holders_of(&fp).await.unwrap(),
            vec!["a.pdf".to_string(), "b.pdf".to_string()]
        );
        assert!(!ledger
            .lookup_by_fingerprint(&Fingerprint::from_hex("other"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn list_filters_by_source() {
        let tmp = TempDir::new().unwrap();
        let ledger = open(&tmp).await;

        ledger
            .upsert("a.pdf", "finance", &Fingerprint::from_hex("1"), Utc::now())
            .await
            .unwrap();
        ledger
            .upsert("b.pdf", "legal", &Fingerprint::from_hex("2"), Utc::now())
            .await
            .unwrap();

        let finance = ledger.list(Some("finance")).await.unwrap();
        assert_eq!(finance.len(), 1);
        assert_eq!(finance[0].identity, "a.pdf");
        assert_eq!(ledger.list(None).await.unwrap().len(), 2);
        assert!(ledger.get("missing.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let ledger = open(&tmp).await;
            ledger
                .upsert("a.pdf", "f", &Fingerprint::from_hex("1"), Utc::now())
                .await
                .unwrap();
            ledger.pool.close().await;
        }
        let ledger = open(&tmp).await;
        assert!(ledger.get("a.pdf").await.unwrap().is_some());
    }
}
