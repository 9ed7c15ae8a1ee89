//! Configuration for the sync server.
//!
//! Loaded from a TOML file (the structured `ApiKeys` maps make a flat env-var
//! layout awkward), with `PORT` and `RUST_LOG`-style overrides still honored
//! from the environment for container/systemd deployments.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use sync_core::DeletePolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeys {
    /// dataset_id -> pre-shared key
    #[serde(default)]
    pub dataset_keys: HashMap<String, String>,
    /// client_id -> pre-shared key, consulted when no dataset mapping exists
    #[serde(default)]
    pub client_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    pub inbound_root: PathBuf,
    pub temp_root: PathBuf,

    #[serde(default)]
    pub delete_strategy: DeletePolicy,

    #[serde(default = "default_max_parallel_uploads")]
    pub max_parallel_uploads: usize,

    #[serde(default)]
    pub api_keys: ApiKeys,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How long an upload session may sit unused before it becomes eligible for
    /// garbage collection (spec §4.5, §4.9 design notes).
    #[serde(default = "default_session_horizon_secs")]
    pub session_horizon_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_max_parallel_uploads() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_horizon_secs() -> u64 {
    6 * 3600
}

impl ServerConfig {
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {}", path.display(), e))?;
        let mut config: ServerConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {}", path.display(), e))?;

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Atomic publish (spec §9) requires the assembly temp file and the final
    /// target to share a filesystem; a cross-device rename would have to fall
    /// back to copy-then-delete, which is not atomic. Reject that configuration
    /// up front rather than discovering it mid-publish.
    fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_uploads == 0 {
            anyhow::bail!("max_parallel_uploads must be >= 1");
        }

        std::fs::create_dir_all(&self.inbound_root)?;
        std::fs::create_dir_all(&self.temp_root)?;

        let inbound_dev = std::fs::metadata(&self.inbound_root)?.dev();
        let temp_dev = std::fs::metadata(&self.temp_root)?.dev();
        if inbound_dev != temp_dev {
            anyhow::bail!(
                "inbound_root and temp_root must be on the same filesystem for atomic publish \
                 (inbound dev={inbound_dev}, temp dev={temp_dev})"
            );
        }

        Ok(())
    }
}

#[cfg(unix)]
trait DevExt {
    fn dev(&self) -> u64;
}

#[cfg(unix)]
impl DevExt for std::fs::Metadata {
    fn dev(&self) -> u64 {
        use std::os::unix::fs::MetadataExt;
        MetadataExt::dev(self)
    }
}

#[cfg(not(unix))]
trait DevExt {
    fn dev(&self) -> u64;
}

#[cfg(not(unix))]
impl DevExt for std::fs::Metadata {
    fn dev(&self) -> u64 {
        0
    }
}
