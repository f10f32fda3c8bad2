//! TOML configuration parsing and validation.
//!
//! ```toml
//! [db]
//! path = "./data/vero.sqlite"
//!
//! [chunking]
//! max_tokens = 512
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [retrieval]
//! default_top_k = 3
//!
//! [ingest]
//! dedup_policy = "global"   # or "per_identity"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub local: Option<LocalConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    512
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for HTTP providers (Ollama, OpenAI-compatible gateways).
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: i64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_top_k() -> i64 {
    3
}

/// How the reconciler treats content already held by a different identity.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Identical content anywhere in the corpus counts as already processed.
    #[default]
    Global,
    /// Only the identity's own last fingerprint is compared; identical
    /// content under a new identity is embedded again.
    PerIdentity,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default)]
    pub dedup_policy: DedupPolicy,
    /// Upper bound for each collaborator call (extract, embed, store,
    /// ledger, download). `0` disables the bound.
    #[serde(default = "default_ingest_timeout_secs")]
    pub timeout_secs: u64,
    /// Where downloaded files are staged before reconciliation. Defaults to
    /// the system temp directory.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedup_policy: DedupPolicy::default(),
            timeout_secs: default_ingest_timeout_secs(),
            scratch_dir: None,
        }
    }
}

fn default_ingest_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DriveConfig {
    #[serde(default = "default_drive_api_base")]
    pub api_base: String,
    /// Folder synced by `vero sync drive` when none is given on the command line.
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Service-account key file used when `GOOGLE_DRIVE_ACCESS_TOKEN` is unset.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            api_base: default_drive_api_base(),
            folder_id: None,
            credentials_path: None,
        }
    }
}

fn default_drive_api_base() -> String {
    "https://www.googleapis.com".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.pdf".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.default_top_k < 1 {
        anyhow::bail!("retrieval.default_top_k must be >= 1");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if matches!(config.embedding.dims, None | Some(0)) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "hashed" => {
            if config.embedding.dims == Some(0) {
                anyhow::bail!("embedding.dims must be > 0 when provider is 'hashed'");
            }
        }
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, hashed, or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Config {
        let raw = format!("[db]\npath = \"/tmp/vero.sqlite\"\n{}", extra);
        toml::from_str(&raw).unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = parse("");
        assert_eq!(cfg.chunking.max_tokens, 512);
        assert_eq!(cfg.retrieval.default_top_k, 3);
        assert_eq!(cfg.ingest.dedup_policy, DedupPolicy::Global);
        assert_eq!(cfg.server.bind, "127.0.0.1:8000");
        assert!(!cfg.embedding.is_enabled());
        assert!(cfg.local.is_none());
        validate(&cfg).unwrap();
    }

    #[test]
    fn per_identity_policy_parses() {
        let cfg = parse("[ingest]\ndedup_policy = \"per_identity\"\n");
        assert_eq!(cfg.ingest.dedup_policy, DedupPolicy::PerIdentity);
    }

    #[test]
    fn openai_requires_model_and_dims() {
        let cfg = parse("[embedding]\nprovider = \"openai\"\n");
        let err = validate(&cfg).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn unknown_provider_rejected() {
        let cfg = parse("[embedding]\nprovider = \"magic\"\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn zero_top_k_rejected() {
        let cfg = parse("[retrieval]\ndefault_top_k = 0\n");
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn local_folder_defaults_to_pdf_glob() {
        let cfg = parse("[local]\nroot = \"/srv/docs\"\n");
        let local = cfg.local.unwrap();
        assert_eq!(local.include_globs, vec!["**/*.pdf".to_string()]);
    }
}
