//! `vero ledger list` and `vero ledger show`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::context::AppContext;
use crate::hasher::Fingerprint;
use crate::ledger::Ledger;
use crate::models::{ChunkFilter, FileRecord};
use crate::vector_store::VectorStore;

/// Print every ledger row, newest first.
pub async fn run_ledger_list(config: &Config, source_label: Option<&str>) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let result = ctx.ledger().list(source_label).await;
    ctx.close().await;
    let mut records = result?;

    if records.is_empty() {
        println!("No processed files.");
        return Ok(());
    }

    sort_newest_first(&mut records);

    println!(
        "{:<40} {:<20} {:<14} {}",
        "IDENTITY", "SOURCE", "FINGERPRINT", "PROCESSED"
    );
    for r in &records {
        println!(
            "{:<40} {:<20} {:<14} {}",
            r.identity,
            r.source_label,
            short_fingerprint(&r.content_fingerprint),
            r.processed_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} file(s)", records.len());
    Ok(())
}

/// Print one ledger row plus the chunks it owns and any identity sharing
/// its content.
pub async fn run_ledger_show(config: &Config, identity: &str) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let result = async {
        let Some(record) = ctx.ledger().get(identity).await? else {
            return Ok(None);
        };
        let fingerprint = Fingerprint::from_hex(record.content_fingerprint.clone());
        let chunks = ctx
            .store()
            .count(&ChunkFilter::version(identity, &fingerprint))
            .await?;
        let holders = ctx.ledger().holders_of(&fingerprint).await?;
        anyhow::Ok(Some((record, chunks, holders)))
    }
    .await;
    ctx.close().await;

    let Some((record, chunks, holders)) = result? else {
        bail!("no ledger record for identity: {}", identity);
    };

    println!("identity:     {}", record.identity);
    println!("source:       {}", record.source_label);
    println!("fingerprint:  {}", record.content_fingerprint);
    println!("processed_at: {}", record.processed_at.to_rfc3339());
    println!("active:       {}", record.is_active);
    println!("chunks:       {}", chunks);
    let others: Vec<&String> = holders.iter().filter(|h| *h != identity).collect();
    if !others.is_empty() {
        println!("same content: {}", others.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "));
    }
    Ok(())
}

fn sort_newest_first(records: &mut [FileRecord]) {
    records.sort_by(|a, b| {
        b.processed_at
            .cmp(&a.processed_at)
            .then_with(|| a.identity.cmp(&b.identity))
    });
}

fn short_fingerprint(hex: &str) -> &str {
    hex.get(..12).unwrap_or(hex)
}
