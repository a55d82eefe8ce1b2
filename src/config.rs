//! Configuration for the catalog ingest service.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Object store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chunking and classification configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Chunk invocation configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Allow any origin (CORS). Off by default.
    #[serde(default)]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_permissive: false,
        }
    }
}

/// Which object store backend holds job inputs, manifests and chunk results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// SQLite file (durable)
    Sqlite,
    /// In-process map (lost on restart)
    Memory,
}

/// Object store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Path of the SQLite database when `backend` is `sqlite`
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// Chunking and classification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Data rows per chunk. Fixed for every job.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Rayon threads used to classify rows inside one chunk
    #[serde(default = "default_classify_threads")]
    pub classify_threads: usize,

    /// Chunks processed concurrently by the in-process worker
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,

    /// Keys fetched per listing page when reconciling job status
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,

    /// Largest accepted input file in bytes
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,

    /// Directory receiving the CSV outputs of synchronous processing
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Attach listing attributes (price tier, stock status, scores) to accepted records
    #[serde(default = "default_true")]
    pub enrich: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            classify_threads: default_classify_threads(),
            max_concurrent_chunks: default_max_concurrent_chunks(),
            list_page_size: default_list_page_size(),
            max_input_bytes: default_max_input_bytes(),
            output_dir: default_output_dir(),
            enrich: true,
        }
    }
}

/// How chunk invocations reach a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawn chunk work on this process
    Local,
    /// POST chunk payloads to `worker_url`
    Http,
}

/// Chunk invocation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_mode")]
    pub mode: DispatchMode,

    /// Base URL of the chunk worker (required for `http` mode)
    #[serde(default)]
    pub worker_url: Option<String>,

    /// Invocations dispatched concurrently for one job
    #[serde(default = "default_dispatch_concurrency")]
    pub concurrency: usize,

    /// Timeout for one HTTP invocation in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Retry configuration for failed invocations
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: default_dispatch_mode(),
            worker_url: None,
            concurrency: default_dispatch_concurrency(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, first try included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `retry` (0 for the first retry).
    /// Doubles each time and saturates at `max_backoff_ms`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processing.chunk_size == 0 {
            anyhow::bail!("chunk_size must be > 0");
        }
        if self.processing.classify_threads == 0 {
            anyhow::bail!("classify_threads must be > 0");
        }
        if self.processing.max_concurrent_chunks == 0 {
            anyhow::bail!("max_concurrent_chunks must be > 0");
        }
        if self.processing.list_page_size == 0 {
            anyhow::bail!("list_page_size must be > 0");
        }
        if self.dispatch.concurrency == 0 {
            anyhow::bail!("dispatch concurrency must be > 0");
        }
        if self.dispatch.retry.max_attempts == 0 {
            anyhow::bail!("max_attempts must be >= 1");
        }
        if self.dispatch.mode == DispatchMode::Http {
            let Some(worker_url) = &self.dispatch.worker_url else {
                anyhow::bail!("worker_url is required when dispatch mode is http");
            };
            url::Url::parse(worker_url)
                .map_err(|e| anyhow::anyhow!("invalid worker_url {worker_url}: {e}"))?;
        }
        self.server
            .bind
            .parse::<std::net::SocketAddr>()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}: {e}", self.server.bind))?;
        Ok(())
    }
}

// Default value functions for serde
fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_backend() -> StorageBackend { StorageBackend::Sqlite }
fn default_sqlite_path() -> PathBuf { PathBuf::from("data/catalog.db") }
fn default_chunk_size() -> u64 { 1000 }
fn default_classify_threads() -> usize { 4 }
fn default_max_concurrent_chunks() -> usize { 4 }
fn default_list_page_size() -> usize { 1000 }
fn default_max_input_bytes() -> usize { 100 * 1024 * 1024 }
fn default_output_dir() -> PathBuf { PathBuf::from("data/processed") }
fn default_true() -> bool { true }
fn default_dispatch_mode() -> DispatchMode { DispatchMode::Local }
fn default_dispatch_concurrency() -> usize { 16 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 100 }
fn default_max_backoff_ms() -> u64 { 5000 }
