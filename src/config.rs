use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/vmill.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Characters shared between consecutive chunks.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    1000
}
fn default_overlap_chars() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `"openai"` or `"disabled"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Shared request budget across all producers.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Hard input ceiling published by the provider, in characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// How far past the ceiling an input may run and still be truncated
    /// instead of rejected. Zero means any oversized input is rejected.
    #[serde(default)]
    pub truncate_tolerance_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_base_url(),
            model: None,
            dims: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            requests_per_minute: default_requests_per_minute(),
            max_input_chars: default_max_input_chars(),
            truncate_tolerance_chars: 0,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_max_input_chars() -> usize {
    2048
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HarvestConfig {
    /// Directory the external scraper drops staged JSON files into.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            staging_dir: default_staging_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}
fn default_include_globs() -> Vec<String> {
    vec!["harvest_*.json".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollConfig {
    /// Base URL of the external document index (Elasticsearch-compatible).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the index API key, when the index
    /// requires authentication.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Cap on extracted text per document, in characters.
    #[serde(default = "default_max_text_chars")]
    pub max_text_chars: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: None,
            interval_secs: default_interval_secs(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            max_text_chars: default_max_text_chars(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    600
}
fn default_page_size() -> usize {
    100
}
fn default_max_pages() -> usize {
    50
}
fn default_max_text_chars() -> usize {
    2000
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
    "127.0.0.1:7341".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }

    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    if config.chunking.max_chars > config.embedding.max_input_chars {
        anyhow::bail!(
            "chunking.max_chars ({}) exceeds embedding.max_input_chars ({})",
            config.chunking.max_chars,
            config.embedding.max_input_chars
        );
    }

    if config.embedding.is_enabled() {
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        match config.embedding.dims {
            None | Some(0) => anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            ),
            Some(_) => {}
        }
        if config.embedding.requests_per_minute == 0 {
            anyhow::bail!("embedding.requests_per_minute must be > 0");
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.poll.page_size == 0 {
        anyhow::bail!("poll.page_size must be > 0");
    }

    Ok(())
}
