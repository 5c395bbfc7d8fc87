//! TOML configuration.
//!
//! ```toml
//! [api]
//! base_url = "https://reportportal.example.com/api"
//! token = "..."              # or RP_API_TOKEN
//! default_project = "demo"
//!
//! [sync]
//! batch_size = 100
//! requests_per_second = 10
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [db]
//! path = "./data/rpsync.sqlite"
//! ```
//!
//! Every section except `[api]` and `[db]` may be omitted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides `api.token`.
pub const TOKEN_ENV: &str = "RP_API_TOKEN";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub default_project: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Page size requested from the remote API.
    #[serde(default = "default_page_size")]
    pub batch_size: usize,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    /// Attempts per page, including the first one.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,
    /// Incremental window used when a unit has no checkpoint yet.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default = "default_true")]
    pub enable_full_sync: bool,
    #[serde(default = "default_true")]
    pub enable_incremental_sync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_page_size(),
            requests_per_second: default_requests_per_second(),
            max_retries: default_fetch_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_concurrent_units: default_max_concurrent_units(),
            lookback_days: default_lookback_days(),
            enable_full_sync: true,
            enable_incremental_sync: true,
        }
    }
}

fn default_page_size() -> usize {
    100
}
fn default_requests_per_second() -> u32 {
    10
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    10_000
}
fn default_max_concurrent_units() -> usize {
    4
}
fn default_lookback_days() -> u32 {
    7
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embed_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embed_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_embed_batch_size(),
            max_retries: default_embed_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
        }
    }
}

/// Vector width of the `hash` provider when `embedding.dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// `local` when fastembed is compiled in, otherwise the offline `hash`
/// provider, so a config without `[embedding]` always yields a working
/// embedder.
fn default_provider() -> String {
    if cfg!(feature = "local-embeddings-fastembed") {
        "local".to_string()
    } else {
        "hash".to_string()
    }
}
fn default_embed_batch_size() -> usize {
    32
}
fn default_embed_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
        }
    }
}

fn default_collection() -> String {
    "reportportal_data".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `console` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "console".to_string()
}

impl Config {
    /// Copy of this config that is safe to print.
    pub fn redacted(&self) -> Config {
        let mut copy = self.clone();
        if !copy.api.token.is_empty() {
            copy.api.token = "********".to_string();
        }
        copy
    }

    fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            anyhow::bail!("api.base_url must not be empty");
        }
        if self.api.token.trim().is_empty() {
            anyhow::bail!("api.token must be set (or export {})", TOKEN_ENV);
        }
        if self.api.request_timeout_secs == 0 {
            anyhow::bail!("api.request_timeout_secs must be > 0");
        }

        if self.sync.batch_size == 0 {
            anyhow::bail!("sync.batch_size must be > 0");
        }
        if self.sync.requests_per_second == 0 {
            anyhow::bail!("sync.requests_per_second must be > 0");
        }
        if self.sync.max_retries == 0 {
            anyhow::bail!("sync.max_retries must be >= 1");
        }
        if self.sync.max_concurrent_units == 0 {
            anyhow::bail!("sync.max_concurrent_units must be >= 1");
        }
        if self.sync.retry_max_delay_ms < self.sync.retry_base_delay_ms {
            anyhow::bail!("sync.retry_max_delay_ms must be >= sync.retry_base_delay_ms");
        }

        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }
        match self.embedding.provider.as_str() {
            "local" => {
                if !cfg!(feature = "local-embeddings-fastembed") {
                    anyhow::bail!(
                        "embedding.provider 'local' requires building with --features local-embeddings-fastembed"
                    );
                }
            }
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                self.require_dims()?;
            }
            "hash" => {
                if self.embedding.dims == Some(0) {
                    anyhow::bail!("embedding.dims must be > 0 when provider is 'hash'");
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be local, openai, ollama, or hash.",
                other
            ),
        }

        match self.logging.format.as_str() {
            "console" | "json" => {}
            other => anyhow::bail!("logging.format must be 'console' or 'json', got '{}'", other),
        }
        Ok(())
    }

    fn require_dims(&self) -> Result<()> {
        if self.embedding.dims.unwrap_or(0) == 0 {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                self.embedding.provider
            );
        }
        Ok(())
    }
}

/// Parse and validate config text, applying the token override from the
/// environment.
pub fn parse_config(content: &str) -> Result<Config> {
    let mut config: Config =
        toml::from_str(content).with_context(|| "Failed to parse config file")?;
    if let Ok(token) = std::env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            config.api.token = token;
        }
    }
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
