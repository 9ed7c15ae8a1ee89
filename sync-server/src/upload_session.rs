//! UploadSession (spec §4.5): allocates and tracks per-file upload scopes.

use crate::error::AppError;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use sync_core::path::validate_relative_path;
use uuid::Uuid;

/// Metadata persisted to `session.json` and mirrored in `AppState::sessions`
/// (spec §6's on-disk layout; spec §9: sessions must survive a process
/// restart well enough to fail `CompleteUpload` cleanly rather than silently
/// vanish).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub dataset_id: String,
    pub client_id: String,
    pub relpath: String,
    pub created_utc: DateTime<Utc>,
}

fn session_dir(state: &AppState, dataset_id: &str, upload_id: Uuid) -> PathBuf {
    state.config.temp_root.join(dataset_id).join(upload_id.to_string())
}

fn meta_path(state: &AppState, dataset_id: &str, upload_id: Uuid) -> PathBuf {
    session_dir(state, dataset_id, upload_id).join("session.json")
}

/// Create a fresh upload session for `relpath` and return its `upload_id`.
/// The server must not reuse upload_ids across sessions; a UUIDv4 gives that
/// guarantee for all practical purposes.
pub fn create(state: &AppState, dataset_id: &str, client_id: &str, relpath: &str) -> Result<Uuid, AppError> {
    let normalized = validate_relative_path(relpath)
        .map_err(|e| AppError::InvalidPath(format!("{relpath}: {e}")))?;

    let upload_id = Uuid::new_v4();
    let dir = session_dir(state, dataset_id, upload_id);
    std::fs::create_dir_all(&dir)?;

    let meta = SessionMeta {
        dataset_id: dataset_id.to_string(),
        client_id: client_id.to_string(),
        relpath: normalized,
        created_utc: Utc::now(),
    };
    let json = serde_json::to_string_pretty(&meta).map_err(|e| anyhow::anyhow!(e))?;
    std::fs::write(meta_path(state, dataset_id, upload_id), json)?;

    state.sessions.insert(upload_id, meta);
    Ok(upload_id)
}

/// Resolve a session, consulting the in-memory registry first and falling
/// back to the on-disk record (e.g. after a server restart).
pub fn get(state: &AppState, dataset_id: &str, upload_id: Uuid) -> Result<SessionMeta, AppError> {
    if let Some(meta) = state.sessions.get(&upload_id) {
        if meta.dataset_id != dataset_id {
            return Err(AppError::SessionMismatch("dataset_id does not match session".into()));
        }
        return Ok(meta.clone());
    }

    let path = meta_path(state, dataset_id, upload_id);
    let content = std::fs::read_to_string(&path).map_err(|_| AppError::SessionNotFound)?;
    let meta: SessionMeta = serde_json::from_str(&content).map_err(|_| AppError::SessionNotFound)?;
    if meta.dataset_id != dataset_id {
        return Err(AppError::SessionMismatch("dataset_id does not match session".into()));
    }
    state.sessions.insert(upload_id, meta.clone());
    Ok(meta)
}

/// Deterministic path for chunk `index` within a session (spec §4.5).
pub fn chunk_path(state: &AppState, dataset_id: &str, upload_id: Uuid, relpath: &str, index: u32) -> PathBuf {
    let safe_name = relpath.replace('/', "_");
    session_dir(state, dataset_id, upload_id).join(format!("{safe_name}.chunk{index}"))
}

/// Recursively remove the session directory. Idempotent: removing an already-
/// absent session is not an error.
pub fn cleanup(state: &AppState, dataset_id: &str, upload_id: Uuid) {
    state.sessions.remove(&upload_id);
    let dir = session_dir(state, dataset_id, upload_id);
    if let Err(e) = std::fs::remove_dir_all(&dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(upload_id = %upload_id, error = %e, "failed to clean up upload session directory");
        }
    }
}

/// Garbage-collect sessions older than `config.session_horizon_secs` (spec §9).
/// Best-effort: errors removing an individual session are logged, not propagated.
pub fn collect_stale(state: &AppState) {
    let horizon = chrono::Duration::seconds(state.config.session_horizon_secs as i64);
    let cutoff = Utc::now() - horizon;

    let stale: Vec<Uuid> = state
        .sessions
        .iter()
        .filter(|entry| entry.value().created_utc < cutoff)
        .map(|entry| *entry.key())
        .collect();

    for upload_id in stale {
        if let Some((_, meta)) = state.sessions.remove(&upload_id) {
            tracing::info!(upload_id = %upload_id, "garbage-collecting stale upload session");
            cleanup(state, &meta.dataset_id, upload_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeys, ServerConfig};
    use sync_core::protocol::DeletePolicy;

    fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            inbound_root: dir.path().join("inbound"),
            temp_root: dir.path().join("temp"),
            delete_strategy: DeletePolicy::Disabled,
            max_parallel_uploads: 4,
            api_keys: ApiKeys { dataset_keys: Default::default(), client_keys: Default::default() },
            log_level: "info".into(),
            session_horizon_secs: 3600,
        };
        std::fs::create_dir_all(&config.inbound_root).unwrap();
        std::fs::create_dir_all(&config.temp_root).unwrap();
        let state = AppState::new(config);
        (dir, state)
    }

    #[test]
    fn create_then_get_round_trips() {
        let (_dir, state) = test_state();
        let upload_id = create(&state, "ds1", "c1", "a/b.txt").unwrap();
        let meta = get(&state, "ds1", upload_id).unwrap();
        assert_eq!(meta.relpath, "a/b.txt");
        assert_eq!(meta.client_id, "c1");
    }

    #[test]
    fn get_unknown_session_fails() {
        let (_dir, state) = test_state();
        assert!(matches!(get(&state, "ds1", Uuid::new_v4()), Err(AppError::SessionNotFound)));
    }

    #[test]
    fn get_with_wrong_dataset_fails() {
        let (_dir, state) = test_state();
        let upload_id = create(&state, "ds1", "c1", "a/b.txt").unwrap();
        assert!(matches!(get(&state, "ds-other", upload_id), Err(AppError::SessionMismatch(_))));
    }

    #[test]
    fn cleanup_is_idempotent() {
        let (_dir, state) = test_state();
        let upload_id = create(&state, "ds1", "c1", "a/b.txt").unwrap();
        cleanup(&state, "ds1", upload_id);
        cleanup(&state, "ds1", upload_id);
        assert!(get(&state, "ds1", upload_id).is_err());
    }

    #[test]
    fn survives_registry_eviction_via_disk_record() {
        let (_dir, state) = test_state();
        let upload_id = create(&state, "ds1", "c1", "a/b.txt").unwrap();
        state.sessions.remove(&upload_id);
        let meta = get(&state, "ds1", upload_id).unwrap();
        assert_eq!(meta.relpath, "a/b.txt");
    }
}
