//! Sync pipeline orchestration.
//!
//! Lists a folder through a [`Source`], downloads each file into a scratch
//! directory, reconciles it, and deletes the scratch copy whether or not
//! reconciliation succeeded. Files are processed one at a time; a failure
//! on one file is logged and counted and the sync moves on.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::context::AppContext;
use crate::error::bounded;
use crate::models::{Outcome, ReconcileReport};
use crate::reconcile::Reconciler;
use crate::source::Source;

/// Tally of one sync run.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub listed: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub replaced: usize,
    pub chunks_written: u64,
    pub chunks_removed: u64,
    /// `(file name, error)` for every file that could not be reconciled.
    pub failed: Vec<(String, String)>,
}

impl SyncSummary {
    fn record(&mut self, report: &ReconcileReport) {
        match report.outcome {
            Outcome::Inserted => self.inserted += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Replaced => self.replaced += 1,
        }
        self.chunks_written += report.chunks_written;
        self.chunks_removed += report.chunks_removed;
    }
}

/// Reconcile every file `source` lists under `folder_id`, tagging chunks
/// and ledger rows with `source_label`.
pub async fn sync_folder(
    ctx: &AppContext,
    source: &dyn Source,
    folder_id: &str,
    source_label: &str,
) -> Result<SyncSummary> {
    let config = ctx.config();
    let secs = config.ingest.timeout_secs;
    let reconciler = ctx.reconciler();

    let files = bounded("folder listing", secs, source.list_files(folder_id)).await?;
    tracing::info!(source = source.kind(), folder_id, files = files.len(), "listed folder");

    let scratch = scratch_dir(config)?;
    let mut summary = SyncSummary {
        listed: files.len(),
        ..SyncSummary::default()
    };

    for file in &files {
        let dest = scratch.path().join(scratch_name(&file.name));
        let result = process_one(
            &reconciler,
            source,
            &file.id,
            &file.name,
            source_label,
            &dest,
            secs,
        )
        .await;

        if let Err(e) = tokio::fs::remove_file(&dest).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %dest.display(), error = %e, "failed to remove scratch file");
            }
        }

        match result {
            Ok(report) => summary.record(&report),
            Err(e) => {
                tracing::warn!(file = %file.name, error = %e, "failed to reconcile");
                summary.failed.push((file.name.clone(), e.to_string()));
            }
        }
    }

    Ok(summary)
}

async fn process_one(
    reconciler: &Reconciler,
    source: &dyn Source,
    id: &str,
    name: &str,
    source_label: &str,
    dest: &Path,
    secs: u64,
) -> crate::error::Result<ReconcileReport> {
    bounded("download", secs, source.download_file(id, dest)).await?;
    reconciler.reconcile(name, source_label, dest).await
}

fn scratch_dir(config: &Config) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("vero-sync-");
    Ok(match &config.ingest.scratch_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)?
        }
        None => builder.tempdir()?,
    })
}

/// Flatten a (possibly nested, possibly hostile) file name into a single
/// path component that keeps its extension.
fn scratch_name(name: &str) -> PathBuf {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base {
        "" | "." | ".." => PathBuf::from("download.pdf"),
        other => PathBuf::from(other),
    }
}

pub fn print_summary(kind: &str, folder_id: &str, summary: &SyncSummary) {
    println!("sync {} {}", kind, folder_id);
    println!("  listed: {} files", summary.listed);
    println!("  inserted: {}", summary.inserted);
    println!("  skipped: {}", summary.skipped);
    println!("  replaced: {}", summary.replaced);
    println!("  chunks written: {}", summary.chunks_written);
    println!("  chunks removed: {}", summary.chunks_removed);
    if !summary.failed.is_empty() {
        println!("  failed: {}", summary.failed.len());
        for (name, err) in &summary.failed {
            println!("    {}: {}", name, err);
        }
    }
}

/// `vero sync <kind> <folder>`: open a context, sync, print, close.
pub async fn run_sync(
    config: &Config,
    source: &dyn Source,
    folder_id: &str,
    source_label: &str,
) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let result = sync_folder(&ctx, source, folder_id, source_label).await;
    ctx.close().await;
    let summary = result?;

    print_summary(source.kind(), folder_id, &summary);
    if !summary.failed.is_empty() {
        bail!("{} of {} files failed", summary.failed.len(), summary.listed);
    }
    println!("ok");
    Ok(())
}

/// `vero ingest <path>`: reconcile one local file.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    source_label: &str,
    identity: Option<&str>,
) -> Result<()> {
    let identity = match identity {
        Some(id) => id.to_string(),
        None => path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow::anyhow!("Cannot derive identity from {}", path.display()))?,
    };

    let ctx = AppContext::open(config).await?;
    let result = ctx.reconciler().reconcile(&identity, source_label, path).await;
    ctx.close().await;
    let report = result?;

    println!("ingest {}", identity);
    println!("  outcome: {}", report.outcome);
    println!("  fingerprint: {}", report.fingerprint);
    println!("  chunks written: {}", report.chunks_written);
    println!("  chunks removed: {}", report.chunks_removed);
    println!("ok");
    Ok(())
}
