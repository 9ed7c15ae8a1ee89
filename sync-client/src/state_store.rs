//! StateStore (spec §4.3): persists the client's last known view of the
//! dataset so it can notice local deletions between runs without re-scanning
//! the server.

use crate::utils::errors::{ClientError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use sync_core::protocol::FileEntry;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateStore {
    /// Case-insensitive relative path -> last file entry synced for it.
    #[serde(default)]
    entries: HashMap<String, FileEntry>,

    #[serde(default)]
    pub last_sync_utc: Option<DateTime<Utc>>,
}

impl StateStore {
    /// Load from `path`, returning an empty store if the file does not yet
    /// exist (first run).
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ClientError::Io(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Paths this store believes exist on the server but that are absent
    /// from `current`, the manifest just built from the local filesystem —
    /// i.e. files the user deleted locally since the last successful run.
    pub fn local_deletions(&self, current: &[FileEntry]) -> Vec<String> {
        let current_keys: std::collections::HashSet<String> =
            current.iter().map(|e| e.path.to_lowercase()).collect();

        self.entries
            .values()
            .filter(|e| !current_keys.contains(&e.path.to_lowercase()))
            .map(|e| e.path.clone())
            .collect()
    }

    /// Replace the tracked state with the manifest just synced, stamping the
    /// sync time.
    pub fn record_sync(&mut self, entries: Vec<FileEntry>, synced_at: DateTime<Utc>) {
        self.entries = entries.into_iter().map(|e| (e.path.to_lowercase(), e)).collect();
        self.last_sync_utc = Some(synced_at);
    }
}
