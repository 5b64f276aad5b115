//! TOML configuration.
//!
//! Every section is optional; a missing key falls back to its default. A
//! minimal config only needs paths:
//!
//! ```toml
//! [db]
//! path = "./data/hj.sqlite"
//!
//! [storage]
//! root = "./data/files"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
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
    PathBuf::from("./data/hj.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/files")
}
fn default_max_upload_bytes() -> u64 {
    50 * 1024 * 1024
}

/// When text extraction runs relative to `upload`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    /// `upload` returns after extraction has finished.
    #[default]
    Inline,
    /// `upload` returns immediately; a background task extracts.
    Deferred,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default)]
    pub mode: ExtractionMode,
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// Tesseract languages, e.g. `nor+eng`.
    #[serde(default = "default_languages")]
    pub languages: String,
    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,
    #[serde(default = "default_max_parallel_pages")]
    pub max_parallel_pages: usize,
    #[serde(default = "default_pdftoppm")]
    pub pdftoppm: PathBuf,
    #[serde(default = "default_tesseract")]
    pub tesseract: PathBuf,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::default(),
            dpi: default_dpi(),
            languages: default_languages(),
            page_timeout_secs: default_page_timeout_secs(),
            max_parallel_pages: default_max_parallel_pages(),
            pdftoppm: default_pdftoppm(),
            tesseract: default_tesseract(),
        }
    }
}

impl ExtractionConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

fn default_dpi() -> u32 {
    200
}
fn default_languages() -> String {
    "nor+eng".to_string()
}
fn default_page_timeout_secs() -> u64 {
    120
}
fn default_max_parallel_pages() -> usize {
    4
}
fn default_pdftoppm() -> PathBuf {
    PathBuf::from("pdftoppm")
}
fn default_tesseract() -> PathBuf {
    PathBuf::from("tesseract")
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

fn default_max_results() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ShareConfig {
    #[serde(default = "default_token_bytes")]
    pub token_bytes: usize,
    /// Lifetime `hj share create` applies when neither `--ttl-days` nor
    /// `--no-expiry` is given. The archive itself treats an absent TTL as
    /// "never expires".
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: i64,
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            token_bytes: default_token_bytes(),
            default_ttl_days: default_ttl_days(),
            public_base_url: default_public_base_url(),
        }
    }
}

fn default_token_bytes() -> usize {
    helsejournal_core::share::DEFAULT_TOKEN_BYTES
}
fn default_ttl_days() -> i64 {
    7
}
fn default_public_base_url() -> String {
    "http://127.0.0.1:7410".to_string()
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
    "127.0.0.1:7410".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveConfig {
    /// Owner used when no `--owner` is given.
    #[serde(default = "default_owner")]
    pub owner: String,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            owner: default_owner(),
        }
    }
}

fn default_owner() -> String {
    "admin".to_string()
}

/// Reads, parses and validates a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.storage.max_upload_bytes == 0 {
        anyhow::bail!("storage.max_upload_bytes must be > 0");
    }

    if !(50..=1200).contains(&config.extraction.dpi) {
        anyhow::bail!("extraction.dpi must be in [50, 1200]");
    }
    if config.extraction.languages.trim().is_empty() {
        anyhow::bail!("extraction.languages must not be empty");
    }
    if config.extraction.page_timeout_secs == 0 {
        anyhow::bail!("extraction.page_timeout_secs must be > 0");
    }
    if config.extraction.max_parallel_pages == 0 {
        anyhow::bail!("extraction.max_parallel_pages must be >= 1");
    }

    if config.search.max_results == 0 {
        anyhow::bail!("search.max_results must be >= 1");
    }

    if config.share.token_bytes < 16 {
        anyhow::bail!("share.token_bytes must be >= 16");
    }
    if config.share.default_ttl_days < 1 {
        anyhow::bail!("share.default_ttl_days must be >= 1");
    }

    if config.archive.owner.trim().is_empty() {
        anyhow::bail!("archive.owner must not be empty");
    }

    Ok(())
}
