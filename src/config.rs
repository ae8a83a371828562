//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/dealdesk.sqlite"
//!
//! [storage]
//! backend = "local"          # or "gcs"
//! root = "./data/buckets"
//! default_bucket = "client-context"
//!
//! [chunking]
//! max_tokens = 700
//!
//! [analysis]
//! provider = "heuristic"     # mock | heuristic | anthropic
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
    pub storage: StorageConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_bucket")]
    pub default_bucket: String,
    /// Overrides `https://storage.googleapis.com` (emulators, proxies).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Object names matching these globs are ignored when listing a folder.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            default_bucket: default_bucket(),
            endpoint_url: None,
            exclude_globs: Vec::new(),
        }
    }
}

fn default_backend() -> String {
    "local".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/buckets")
}
fn default_bucket() -> String {
    "client-context".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// Sections at or below this size are kept as a single chunk.
    #[serde(default = "default_section_max_tokens")]
    pub section_max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            section_max_tokens: default_section_max_tokens(),
        }
    }
}

fn default_min_tokens() -> usize {
    300
}
fn default_max_tokens() -> usize {
    700
}
fn default_overlap() -> usize {
    50
}
fn default_section_max_tokens() -> usize {
    750
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Run the pipeline in the background right after `POST /upload/file`.
    #[serde(default)]
    pub process_on_upload: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            process_on_upload: false,
        }
    }
}

fn default_provider() -> String {
    "heuristic".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_max_file_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.min_tokens > config.chunking.max_tokens {
        anyhow::bail!("chunking.min_tokens must be <= chunking.max_tokens");
    }

    match config.storage.backend.as_str() {
        "local" | "gcs" => {}
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be local or gcs.",
            other
        ),
    }

    match config.analysis.provider.as_str() {
        "mock" | "heuristic" => {}
        "anthropic" => {
            if config.analysis.model.is_none() {
                anyhow::bail!("analysis.model must be specified when provider is 'anthropic'");
            }
        }
        other => anyhow::bail!(
            "Unknown analysis provider: '{}'. Must be mock, heuristic, or anthropic.",
            other
        ),
    }

    if config.limits.max_file_bytes == 0 {
        anyhow::bail!("limits.max_file_bytes must be > 0");
    }

    Ok(())
}
