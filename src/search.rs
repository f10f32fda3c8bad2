//! `vero search`: query the index from the command line.
//!
//! Runs the same [`Retriever`](crate::retrieval::Retriever) the HTTP server
//! uses and prints one block per hit.

use anyhow::Result;

use crate::config::Config;
use crate::context::AppContext;
use crate::models::SearchHit;

pub async fn run_search(config: &Config, query: &str, top_k: Option<i64>) -> Result<()> {
    let top_k = top_k.unwrap_or(config.retrieval.default_top_k);

    let ctx = AppContext::open(config).await?;
    let result = ctx.retriever().search(query, top_k).await;
    ctx.close().await;
    let hits = result?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit);
    }
    Ok(())
}

fn print_hit(rank: usize, hit: &SearchHit) {
    println!("{}. [{:.2}] {} / {}", rank, hit.score, hit.source_label, hit.identity);
    println!("    excerpt: \"{}\"", excerpt(&hit.text, 240));
    println!();
}

/// First `max_chars` characters of `text` on a single line.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
