//! Client configuration, loaded from a TOML file with environment overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientIdentity,
    pub server: ServerConnection,
    pub sync: SyncSettings,
    #[serde(default)]
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Unique client identifier, used for AuthGate fallback and for scoping
    /// upload-session chunk directories.
    #[serde(default = "default_client_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConnection {
    /// Base URL of the sync-server, e.g. `http://localhost:8080`.
    pub url: String,

    /// Dataset this client mirrors into.
    pub dataset_id: String,

    /// Pre-shared key sent as `X-Api-Key`.
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Local directory to mirror.
    pub root: PathBuf,

    /// Chunk size in bytes for resumable uploads.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum number of files uploaded concurrently.
    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,

    /// Path to the local state store (spec §4.3), relative paths are resolved
    /// against the current working directory.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    /// Whether to always compute and send a sha256 alongside size/mtime in
    /// the manifest (spec §4.2's optional hash hint).
    #[serde(default)]
    pub always_hash: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_client_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "sync-client".to_string())
}

fn default_chunk_size() -> usize {
    4 * 1024 * 1024
}

fn default_max_parallel_uploads() -> usize {
    4
}

fn default_state_path() -> PathBuf {
    PathBuf::from(".sync-state.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let config: ClientConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.sync.chunk_size == 0 {
            anyhow::bail!("sync.chunk_size must be >= 1");
        }
        if self.sync.max_parallel_uploads == 0 {
            anyhow::bail!("sync.max_parallel_uploads must be >= 1");
        }
        if self.server.dataset_id.is_empty() {
            anyhow::bail!("server.dataset_id must not be empty");
        }
        Ok(())
    }
}
