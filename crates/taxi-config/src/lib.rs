use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    Both,
    Documents,
    Bitmap,
}

impl IngestMode {
    pub fn writes_documents(self) -> bool {
        matches!(self, Self::Both | Self::Documents)
    }

    pub fn writes_bitmap(self) -> bool {
        matches!(self, Self::Both | Self::Bitmap)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_mode")]
    pub mode: IngestMode,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
    #[serde(default = "default_encode_workers")]
    pub encode_workers: usize,
    #[serde(default = "default_write_workers")]
    pub write_workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_true")]
    pub skip_header: bool,
    #[serde(default = "default_report_interval_seconds")]
    pub report_interval_seconds: f64,
    #[serde(default)]
    pub first_sequence_id: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_unit_delay_ms")]
    pub unit_delay_ms: u64,
    #[serde(default = "default_overload_markers")]
    pub overload_markers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocumentStoreConfig {
    #[serde(default = "default_docstore_url")]
    pub url: String,
    #[serde(default = "default_docstore_database")]
    pub database: String,
    #[serde(default = "default_docstore_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BitmapStoreConfig {
    #[serde(default = "default_bitmap_url")]
    pub url: String,
    #[serde(default = "default_bitmap_index")]
    pub index: String,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default)]
    pub elevation_table: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub document_store: DocumentStoreConfig,
    #[serde(default)]
    pub bitmap_store: BitmapStoreConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            mode: default_mode(),
            fetch_workers: default_fetch_workers(),
            encode_workers: default_encode_workers(),
            write_workers: default_write_workers(),
            channel_capacity: default_channel_capacity(),
            skip_header: true,
            report_interval_seconds: default_report_interval_seconds(),
            first_sequence_id: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            unit_delay_ms: default_unit_delay_ms(),
            overload_markers: default_overload_markers(),
        }
    }
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            url: default_docstore_url(),
            database: default_docstore_database(),
            collection: default_docstore_collection(),
            api_key: String::new(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

impl Default for BitmapStoreConfig {
    fn default() -> Self {
        Self {
            url: default_bitmap_url(),
            index: default_bitmap_index(),
            buffer_size: default_buffer_size(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}

fn default_mode() -> IngestMode {
    IngestMode::Both
}

fn default_fetch_workers() -> usize {
    4
}

fn default_encode_workers() -> usize {
    8
}

fn default_write_workers() -> usize {
    16
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_report_interval_seconds() -> f64 {
    10.0
}

fn default_max_attempts() -> u32 {
    10
}

fn default_unit_delay_ms() -> u64 {
    100
}

fn default_overload_markers() -> Vec<String> {
    vec![
        "Request rate is large".to_string(),
        "429 Too Many Requests".to_string(),
    ]
}

fn default_docstore_url() -> String {
    "http://127.0.0.1:10255".to_string()
}

fn default_docstore_database() -> String {
    "taxi".to_string()
}

fn default_docstore_collection() -> String {
    "ridesColl".to_string()
}

fn default_bitmap_url() -> String {
    "http://127.0.0.1:10101".to_string()
}

fn default_bitmap_index() -> String {
    "taxi".to_string()
}

fn default_buffer_size() -> usize {
    100_000
}

fn default_timeout_seconds() -> f64 {
    60.0
}

fn default_true() -> bool {
    true
}

pub fn expand_path(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{}", home.to_string_lossy(), stripped);
        }
    }
    path.to_string()
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

fn home_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".taxi-ingest").join("config.toml"))
}

fn repo_default_config_path() -> PathBuf {
    PathBuf::from("config/taxi-ingest.toml")
}

fn resolve_config_path_with_overrides(
    raw_path: Option<PathBuf>,
    env_keys: &[&str],
    home_path: Option<PathBuf>,
    repo_default: PathBuf,
) -> PathBuf {
    if let Some(path) = raw_path {
        return path;
    }

    for key in env_keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed);
            }
        }
    }

    if let Some(path) = home_path {
        if path.exists() {
            return path;
        }
    }

    repo_default
}

pub fn resolve_config_path(raw_path: Option<PathBuf>) -> PathBuf {
    resolve_config_path_with_overrides(
        raw_path,
        &["TAXI_INGEST_CONFIG"],
        home_config_path(),
        repo_default_config_path(),
    )
}

fn ensure_finite_seconds(key: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(anyhow!("{key} must be a finite number of seconds, got {value}"))
    }
}

fn normalize_config(mut cfg: AppConfig) -> Result<AppConfig> {
    ensure_finite_seconds(
        "ingest.report_interval_seconds",
        cfg.ingest.report_interval_seconds,
    )?;
    ensure_finite_seconds(
        "document_store.timeout_seconds",
        cfg.document_store.timeout_seconds,
    )?;
    ensure_finite_seconds(
        "bitmap_store.timeout_seconds",
        cfg.bitmap_store.timeout_seconds,
    )?;

    for source in &mut cfg.ingest.sources {
        if !is_remote(source) {
            *source = expand_path(source);
        }
    }
    cfg.catalog.elevation_table = expand_path(&cfg.catalog.elevation_table);
    Ok(cfg)
}

pub fn parse_config(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content).context("failed to parse TOML config")?;
    normalize_config(cfg)
}

pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config {}", path.as_ref().display()))?;
    parse_config(&content)
}
