//! Ledger and index statistics.
//!
//! Provides a quick summary of what's indexed: processed-file counts, chunk
//! counts, and a per-source breakdown with the most recent processing time.
//! Used by `vero stats` to confirm that syncs are landing.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

/// Per-source breakdown of file and chunk counts.
#[derive(Debug, PartialEq)]
pub struct SourceStats {
    pub source_label: String,
    pub file_count: i64,
    pub chunk_count: i64,
    /// RFC 3339 timestamp of the most recently processed file.
    pub last_processed: Option<String>,
}

/// Per-source rows, largest source first.
pub async fn source_stats(pool: &SqlitePool) -> Result<Vec<SourceStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            p.source_label,
            COUNT(*) AS file_count,
            MAX(p.processed_at) AS last_processed,
            (SELECT COUNT(*) FROM chunks c WHERE c.source_label = p.source_label) AS chunk_count
        FROM processed_files p
        GROUP BY p.source_label
        ORDER BY file_count DESC, p.source_label
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| SourceStats {
            source_label: row.get("source_label"),
            file_count: row.get("file_count"),
            chunk_count: row.get("chunk_count"),
            last_processed: row.get("last_processed"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::apply(&pool).await?;

    let total_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_files")
        .fetch_one(&pool)
        .await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(&pool)
        .await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Vero Index: Database Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Files:       {}", total_files);
    println!("  Chunks:      {}", total_chunks);

    let sources = source_stats(&pool).await?;
    if !sources.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<32} {:>6} {:>8}   {}",
            "SOURCE", "FILES", "CHUNKS", "LAST PROCESSED"
        );
        println!("  {}", "-".repeat(72));

        for s in &sources {
            let when = s
                .last_processed
                .as_deref()
                .map(format_ts_relative)
                .unwrap_or_else(|| "never".to_string());
            println!(
                "  {:<32} {:>6} {:>8}   {}",
                s.source_label, s.file_count, s.chunk_count, when
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format an RFC 3339 timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(raw: &str) -> String {
    let Ok(ts) = chrono::DateTime::parse_from_rfc3339(raw) else {
        return raw.to_string();
    };
    let delta = chrono::Utc::now().timestamp() - ts.timestamp();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
