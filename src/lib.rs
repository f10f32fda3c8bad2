//! # Vero Index
//!
//! Deduplicating PDF ingestion into a local vector index, with a search API
//! and an MCP server on top.
//!
//! Vero lists a folder (Google Drive or a local directory), fingerprints each
//! PDF by SHA-256, and consults a durable ledger to decide whether the file
//! is new, unchanged, or a new version of something already indexed. Only
//! new content is extracted, chunked, and embedded; a new version replaces
//! the chunks of the old one so search never returns stale text.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Sources   │──▶│  Reconciler  │──▶│    SQLite    │
//! │ Drive/Local │   │ hash+ledger  │   │ ledger+chunks│
//! └─────────────┘   └──────────────┘   └──────┬───────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌───────────┐
//!                 │   CLI    │          │ HTTP + MCP│
//!                 │  (vero)  │          │  server   │
//!                 └──────────┘          └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vero init                          # create database
//! vero sync drive <folder_id>        # ingest a Drive folder
//! vero sync local --root ./pdfs      # ingest a local directory
//! vero search "refund policy"
//! vero serve http                    # start HTTP + MCP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Core error type |
//! | [`models`] | Core data types |
//! | [`hasher`] | Streaming SHA-256 content fingerprints |
//! | [`ledger`] | Processed-file ledger |
//! | [`vector_store`] | Chunk storage and similarity search |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`reconcile`] | Insert / skip / replace decision per file |
//! | [`source`] | Google Drive and local folder listing |
//! | [`drive_auth`] | Drive bearer tokens and service-account grant |
//! | [`ingest`] | Folder sync pipeline |
//! | [`retrieval`] | Normalized top-k search |
//! | [`tools`] | Agent tools shared by HTTP and MCP |
//! | [`server`] | HTTP server |
//! | [`mcp`] | MCP bridge (HTTP and stdio) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod drive_auth;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod hasher;
pub mod ingest;
pub mod ledger;
pub mod ledger_cmd;
pub mod mcp;
pub mod migrate;
pub mod models;
pub mod reconcile;
pub mod retrieval;
pub mod search;
pub mod server;
pub mod source;
pub mod stats;
pub mod tools;
pub mod vector_store;
