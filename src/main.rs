//! # Vero CLI (`vero`)
//!
//! The `vero` binary initializes the database, syncs folders into the index,
//! inspects the ledger, runs searches, and starts the HTTP or stdio MCP
//! server.
//!
//! ## Usage
//!
//! ```bash
//! vero --config ./config/vero.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vero init` | Create the SQLite database and run schema migrations |
//! | `vero sync drive [folder_id]` | Reconcile every PDF in a Google Drive folder |
//! | `vero sync local [--root DIR]` | Reconcile every PDF under a local directory |
//! | `vero ingest <path> --source <label>` | Reconcile a single file |
//! | `vero search "<query>"` | Search indexed documents |
//! | `vero ledger list` | List processed files |
//! | `vero ledger show <identity>` | Show one ledger record |
//! | `vero stats` | Database statistics |
//! | `vero serve http` | Start the HTTP search + MCP server |
//! | `vero serve stdio` | Serve MCP over stdin/stdout |
//!
//! Logs go to stderr and are filtered by `RUST_LOG` (default `warn`).

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vero::config::{self, Config};
use vero::source::{GoogleDriveSource, LocalFolderSource};
use vero::{ingest, ledger_cmd, mcp, migrate, search, server, stats};

/// Vero: deduplicating PDF ingestion and search.
#[derive(Parser)]
#[command(
    name = "vero",
    about = "Vero: deduplicating PDF ingestion into a local vector index",
    version,
    long_about = "Vero syncs PDFs from Google Drive or a local folder into a SQLite vector \
    index, skipping files whose content has already been processed and replacing the chunks \
    of files that changed. The index is searchable from the CLI, over HTTP, and over MCP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vero.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Reconcile every PDF in a folder.
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },

    /// Reconcile a single local file.
    Ingest {
        path: PathBuf,

        /// Source label recorded on the ledger row and chunks.
        #[arg(long)]
        source: String,

        /// Ledger identity. Defaults to the file name.
        #[arg(long)]
        identity: Option<String>,
    },

    /// Search indexed documents.
    Search {
        query: String,

        /// Number of results. Defaults to `retrieval.default_top_k`.
        #[arg(long)]
        top_k: Option<i64>,
    },

    /// Inspect the processed-file ledger.
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },

    /// Show database statistics.
    Stats,

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum SyncTarget {
    /// Google Drive folder. Requires `GOOGLE_DRIVE_ACCESS_TOKEN`.
    Drive {
        /// Folder id. Defaults to `drive.folder_id`.
        folder_id: Option<String>,
    },

    /// Local directory.
    Local {
        /// Directory to scan. Defaults to `local.root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Source label. Defaults to the directory path.
        #[arg(long)]
        source: Option<String>,
    },
}

#[derive(Subcommand)]
enum LedgerAction {
    /// List processed files, newest first.
    List {
        #[arg(long)]
        source: Option<String>,
    },

    /// Show one record.
    Show { identity: String },
}

#[derive(Subcommand)]
enum ServeService {
    /// HTTP search API plus MCP at `/mcp`.
    Http,
    /// MCP over stdin/stdout.
    Stdio,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync { target } => run_sync(&cfg, target).await?,
        Commands::Ingest {
            path,
            source,
            identity,
        } => {
            ingest::run_ingest(&cfg, &path, &source, identity.as_deref()).await?;
        }
        Commands::Search { query, top_k } => {
            search::run_search(&cfg, &query, top_k).await?;
        }
        Commands::Ledger { action } => match action {
            LedgerAction::List { source } => {
                ledger_cmd::run_ledger_list(&cfg, source.as_deref()).await?;
            }
            LedgerAction::Show { identity } => {
                ledger_cmd::run_ledger_show(&cfg, &identity).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Http => {
                server::run_server(&cfg).await?;
            }
            ServeService::Stdio => {
                mcp::serve_stdio(&cfg).await?;
            }
        },
    }

    Ok(())
}

async fn run_sync(cfg: &Config, target: SyncTarget) -> anyhow::Result<()> {
    match target {
        SyncTarget::Drive { folder_id } => {
            let Some(folder_id) = folder_id.or_else(|| cfg.drive.folder_id.clone()) else {
                bail!("No folder id given and drive.folder_id is not set");
            };
            let source = GoogleDriveSource::from_config(&cfg.drive)?;
            ingest::run_sync(cfg, &source, &folder_id, &folder_id).await
        }
        SyncTarget::Local { root, source } => {
            let local = cfg.local.clone();
            let root = root
                .or_else(|| local.as_ref().map(|l| l.root.clone()))
                .context("No --root given and [local] root is not set")?;
            let folder = root.to_string_lossy().to_string();
            let label = source.unwrap_or_else(|| folder.clone());

            let scanner = match &local {
                Some(l) => LocalFolderSource::from_config(l)?,
                None => LocalFolderSource::new(&["**/*.pdf".to_string()], &[], false)?,
            };
            ingest::run_sync(cfg, &scanner, &folder, &label).await
        }
    }
}
