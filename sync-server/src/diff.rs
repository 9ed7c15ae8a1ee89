//! DiffEngine (spec §4.4): computes the upload/delete sets under Last-Writer-Wins.

use crate::error::AppError;
use crate::state::AppState;
use crate::upload_session;
use chrono::{DateTime, SubsecRound, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use sync_core::protocol::{DeletePolicy, DiffResponse, FileEntry, ManifestRequest, UploadInstruction};
use sync_core::path::validate_relative_path;
use walkdir::WalkDir;

struct ServerEntry {
    /// Original-case relative path, as stored on disk.
    path: String,
    size: u64,
    mtime: DateTime<Utc>,
    abs_path: PathBuf,
}

/// Enumerate the dataset root into a case-insensitive map of relative path to
/// entry, mirroring the client's own manifest-building walk (spec §4.2).
fn scan_dataset(root: &Path) -> Result<HashMap<String, ServerEntry>, AppError> {
    let mut map = HashMap::new();
    if !root.exists() {
        return Ok(map);
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| anyhow::anyhow!("dataset scan failed: {e}"))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");

        let metadata = entry.metadata().map_err(|e| anyhow::anyhow!("stat failed: {e}"))?;
        let mtime: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| anyhow::anyhow!("mtime unavailable: {e}"))?
            .into();

        map.insert(
            relative.to_lowercase(),
            ServerEntry {
                path: relative,
                size: metadata.len(),
                mtime: mtime.trunc_subsecs(0),
                abs_path: entry.path().to_path_buf(),
            },
        );
    }

    Ok(map)
}

fn hash_file(path: &Path) -> Result<String, AppError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Returns `true` iff `c` (client) should be (re-)uploaded over `s` (server),
/// per spec §4.4's `VersionPolicy.ShouldUpload`.
fn should_upload(server: &ServerEntry, client: &FileEntry) -> Result<bool, AppError> {
    let client_mtime = client.last_write_utc.trunc_subsecs(0);

    if client_mtime > server.mtime {
        return Ok(true);
    }
    if client_mtime < server.mtime {
        return Ok(false);
    }
    // Equal mtime: size, then hash, tiebreak.
    if client.size != server.size {
        return Ok(true);
    }
    if let Some(client_hash) = &client.sha256 {
        let server_hash = hash_file(&server.abs_path)?;
        if !client_hash.eq_ignore_ascii_case(&server_hash) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Compute the diff for one manifest and mint upload sessions for every path
/// selected for upload.
pub fn diff(state: &AppState, req: &ManifestRequest) -> Result<DiffResponse, AppError> {
    let dataset_root = state.config.inbound_root.join(&req.dataset_id);
    let server_map = scan_dataset(&dataset_root)?;

    let mut upload = Vec::new();
    let mut seen_client_keys = std::collections::HashSet::new();

    for client_entry in &req.files {
        let normalized = validate_relative_path(&client_entry.path)
            .map_err(|e| AppError::InvalidPath(format!("{}: {e}", client_entry.path)))?;
        let key = normalized.to_lowercase();
        seen_client_keys.insert(key.clone());

        let needs_upload = match server_map.get(&key) {
            None => true,
            Some(server_entry) => should_upload(server_entry, client_entry)?,
        };

        if needs_upload {
            let instruction = upload_session::create(state, &req.dataset_id, &req.client_id, &normalized)?;
            upload.push(UploadInstruction {
                path: normalized,
                upload_id: instruction,
            });
        }
    }

    let delete = if state.config.delete_strategy == DeletePolicy::LwwDelete {
        server_map
            .values()
            .filter(|entry| !seen_client_keys.contains(&entry.path.to_lowercase()))
            .map(|entry| entry.path.clone())
            .collect()
    } else {
        Vec::new()
    };

    Ok(DiffResponse { upload, delete })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use chrono::TimeZone;
    use std::collections::HashMap as StdHashMap;

    fn test_config(inbound: &Path, temp: &Path) -> ServerConfig {
        ServerConfig {
            port: 0,
            inbound_root: inbound.to_path_buf(),
            temp_root: temp.to_path_buf(),
            delete_strategy: DeletePolicy::LwwDelete,
            max_parallel_uploads: 4,
            api_keys: crate::config::ApiKeys {
                dataset_keys: StdHashMap::new(),
                client_keys: StdHashMap::new(),
            },
            log_level: "info".into(),
            session_horizon_secs: 3600,
        }
    }

    #[test]
    fn fresh_upload_is_selected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("inbound")).unwrap();
        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        let state = AppState::new(test_config(&dir.path().join("inbound"), &dir.path().join("temp")));

        let req = ManifestRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            files: vec![FileEntry {
                path: "a/b.txt".into(),
                size: 9,
                last_write_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                sha256: None,
            }],
        };

        let result = diff(&state, &req).unwrap();
        assert_eq!(result.upload.len(), 1);
        assert_eq!(result.upload[0].path, "a/b.txt");
        assert!(result.delete.is_empty());
    }

    #[test]
    fn older_client_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("inbound");
        let ds_dir = inbound.join("ds1");
        std::fs::create_dir_all(&ds_dir).unwrap();
        std::fs::write(ds_dir.join("x.txt"), b"OLDSERVER1").unwrap();

        let newer = std::time::SystemTime::now();
        let f = std::fs::File::options().write(true).open(ds_dir.join("x.txt")).unwrap();
        f.set_modified(newer).unwrap();

        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        let state = AppState::new(test_config(&inbound, &dir.path().join("temp")));

        let req = ManifestRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            files: vec![FileEntry {
                path: "x.txt".into(),
                size: 3,
                last_write_utc: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
                sha256: None,
            }],
        };

        let result = diff(&state, &req).unwrap();
        assert!(result.upload.is_empty());
    }

    #[test]
    fn mirror_delete_selects_server_only_paths() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("inbound");
        let ds_dir = inbound.join("ds1");
        std::fs::create_dir_all(&ds_dir).unwrap();
        std::fs::write(ds_dir.join("old.txt"), b"stale").unwrap();

        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        let state = AppState::new(test_config(&inbound, &dir.path().join("temp")));

        let req = ManifestRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            files: vec![],
        };

        let result = diff(&state, &req).unwrap();
        assert_eq!(result.delete, vec!["old.txt".to_string()]);
    }

    #[test]
    fn delete_disabled_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let inbound = dir.path().join("inbound");
        let ds_dir = inbound.join("ds1");
        std::fs::create_dir_all(&ds_dir).unwrap();
        std::fs::write(ds_dir.join("old.txt"), b"stale").unwrap();

        std::fs::create_dir_all(dir.path().join("temp")).unwrap();
        let mut config = test_config(&inbound, &dir.path().join("temp"));
        config.delete_strategy = DeletePolicy::Disabled;
        let state = AppState::new(config);

        let req = ManifestRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            files: vec![],
        };

        let result = diff(&state, &req).unwrap();
        assert!(result.delete.is_empty());
    }
}
