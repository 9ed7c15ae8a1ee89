//! MergeEngine (spec §4.6): chunk ingestion and the atomic publish step that
//! makes an uploaded file visible under the dataset root.

use crate::error::AppError;
use crate::state::AppState;
use crate::upload_session;
use bytes::Bytes;
use chrono::SubsecRound;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::PathBuf;
use sync_core::protocol::{CompleteRequest, FileEntry};
use uuid::Uuid;

/// Write one chunk to disk, overwriting any earlier attempt at the same index.
/// Re-sending a chunk (after a dropped connection, spec §4.5) is always safe:
/// the write is keyed by `(upload_id, index)`, so a retry simply clobbers the
/// half-written predecessor.
pub async fn save_chunk(
    state: &AppState,
    dataset_id: &str,
    client_id: &str,
    upload_id: Uuid,
    relpath: &str,
    index: u32,
    bytes: Bytes,
) -> Result<(), AppError> {
    let session = upload_session::get(state, dataset_id, upload_id)?;
    if session.client_id != client_id {
        return Err(AppError::SessionMismatch("client_id does not match session".into()));
    }
    if !session.relpath.eq_ignore_ascii_case(relpath) {
        return Err(AppError::SessionMismatch("relpath does not match session".into()));
    }

    let path = upload_session::chunk_path(state, dataset_id, upload_id, &session.relpath, index);

    tokio::task::spawn_blocking(move || -> Result<(), AppError> {
        let mut file = std::fs::File::create(&path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    Ok(())
}

/// Assemble `chunk_count` chunks into a single file under `temp_root`, hashing
/// as it streams so a second read pass is never needed.
fn assemble(
    session_dir_chunks: impl Fn(u32) -> PathBuf,
    chunk_count: u32,
    assembly_path: &PathBuf,
) -> Result<(u64, String), AppError> {
    let mut out = std::fs::File::create(assembly_path)?;
    let mut hasher = Sha256::new();
    let mut total: u64 = 0;
    let mut buf = [0u8; 64 * 1024];

    for index in 0..chunk_count {
        let chunk_path = session_dir_chunks(index);
        let mut chunk = std::fs::File::open(&chunk_path).map_err(|_| AppError::ChunkCountMismatch {
            expected: chunk_count,
            got: index,
        })?;
        loop {
            let n = chunk.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
            hasher.update(&buf[..n]);
            total += n as u64;
        }
    }
    out.sync_all()?;

    Ok((total, hex::encode(hasher.finalize())))
}

/// Runs the full 11-step publish sequence: acquire concurrency permits,
/// assemble chunks, verify size and (optionally) hash, atomically rename into
/// place, stamp mtime, and clean up the session. Any failure after the global
/// semaphore is acquired still runs session cleanup via the caller's
/// `cleanup_on_error` discipline — callers should treat a non-conflict error
/// as terminal for the session and let the client re-diff.
pub async fn complete_upload(
    state: &AppState,
    dataset_id: &str,
    upload_id: Uuid,
    req: &CompleteRequest,
) -> Result<FileEntry, AppError> {
    let session = upload_session::get(state, dataset_id, upload_id)?;

    // Bound overall publish concurrency (spec §4.9: "no more than
    // max_parallel_uploads assemblies may run at once").
    let _permit = state
        .upload_semaphore
        .acquire()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    // Serialize publishes to the same destination path so two uploads of the
    // same file can never interleave their renames (spec §4.6, §9).
    let path_lock = state.path_lock(dataset_id, &session.relpath);
    let _guard = path_lock.lock().await;

    let relpath = session.relpath.clone();
    let temp_root = state.config.temp_root.clone();
    let inbound_root = state.config.inbound_root.clone();
    let dataset_id_owned = dataset_id.to_string();
    let chunk_count = req.chunk_count;
    let expected_size = req.expected_size;
    let expected_hash = req.sha256.clone();
    let last_write_utc = req.last_write_utc;

    let entry = tokio::task::spawn_blocking(move || -> Result<Option<FileEntry>, AppError> {
        let session_dir = temp_root.join(&dataset_id_owned).join(upload_id.to_string());
        let final_path = inbound_root.join(&dataset_id_owned).join(&relpath);

        // VersionPolicy.ShouldOverwrite: a server write may have landed between
        // Diff and Complete (spec §4.6 steps 2-3). Re-check LWW here as the
        // authoritative gate — an older complete is an idempotent no-op, not
        // an error.
        if let Ok(metadata) = std::fs::metadata(&final_path) {
            let server_mtime: chrono::DateTime<chrono::Utc> = metadata.modified()?.into();
            if last_write_utc <= server_mtime.trunc_subsecs(0) {
                return Ok(None);
            }
        }
        let chunk_at = {
            let relpath = relpath.clone();
            let session_dir = session_dir.clone();
            move |index: u32| {
                let safe_name = relpath.replace('/', "_");
                session_dir.join(format!("{safe_name}.chunk{index}"))
            }
        };

        let assembly_path = session_dir.join("assembled.tmp");
        let (actual_size, actual_hash) = assemble(chunk_at, chunk_count, &assembly_path)?;

        if actual_size != expected_size {
            let _ = std::fs::remove_file(&assembly_path);
            return Err(AppError::SizeMismatch { expected: expected_size, got: actual_size });
        }
        if let Some(expected) = &expected_hash {
            if !expected.eq_ignore_ascii_case(&actual_hash) {
                let _ = std::fs::remove_file(&assembly_path);
                return Err(AppError::HashMismatch { expected: expected.clone(), got: actual_hash });
            }
        }

        if let Some(parent) = final_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Same-filesystem rename is atomic; `ServerConfig::validate` already
        // rejected configurations where temp_root and inbound_root straddle
        // devices, so this can't silently degrade into copy-then-delete.
        std::fs::rename(&assembly_path, &final_path)?;

        let mtime = last_write_utc.into();
        let file = std::fs::File::options().write(true).open(&final_path)?;
        file.set_modified(mtime)?;

        Ok(Some(FileEntry {
            path: relpath,
            size: actual_size,
            last_write_utc,
            sha256: Some(actual_hash),
        }))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;

    upload_session::cleanup(state, dataset_id, upload_id);

    match entry {
        Some(entry) => Ok(entry),
        None => {
            // LWW no-op: target untouched. Read it back to report current state.
            let final_path = state.config.inbound_root.join(dataset_id).join(&session.relpath);
            let metadata = std::fs::metadata(&final_path)?;
            let mtime: chrono::DateTime<chrono::Utc> = metadata.modified()?.into();
            Ok(FileEntry {
                path: session.relpath,
                size: metadata.len(),
                last_write_utc: mtime,
                sha256: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiKeys, ServerConfig};
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use sync_core::protocol::DeletePolicy;

    fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            port: 0,
            inbound_root: dir.path().join("inbound"),
            temp_root: dir.path().join("temp"),
            delete_strategy: DeletePolicy::Disabled,
            max_parallel_uploads: 2,
            api_keys: ApiKeys { dataset_keys: Default::default(), client_keys: Default::default() },
            log_level: "info".into(),
            session_horizon_secs: 3600,
        };
        std::fs::create_dir_all(&config.inbound_root).unwrap();
        std::fs::create_dir_all(&config.temp_root).unwrap();
        let state = AppState::new(config);
        (dir, state)
    }

    #[tokio::test]
    async fn completes_a_single_chunk_upload() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "a/b.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a/b.txt", 0, Bytes::from_static(b"hello world")).await.unwrap();

        let mut hasher = Sha256::new();
        hasher.update(b"hello world");
        let expected_hash = hex::encode(hasher.finalize());

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 11,
            sha256: Some(expected_hash.clone()),
            chunk_count: 1,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        let entry = complete_upload(&state, "ds1", upload_id, &req).await.unwrap();
        assert_eq!(entry.path, "a/b.txt");
        assert_eq!(entry.size, 11);

        let published = state.config.inbound_root.join("ds1").join("a/b.txt");
        assert_eq!(std::fs::read_to_string(&published).unwrap(), "hello world");
        assert!(upload_session::get(&state, "ds1", upload_id).is_err());
    }

    #[tokio::test]
    async fn completes_a_multi_chunk_upload_in_order() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "big.bin").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "big.bin", 0, Bytes::from_static(b"AAAA")).await.unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "big.bin", 1, Bytes::from_static(b"BBBB")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 8,
            sha256: None,
            chunk_count: 2,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        complete_upload(&state, "ds1", upload_id, &req).await.unwrap();
        let published = state.config.inbound_root.join("ds1").join("big.bin");
        assert_eq!(std::fs::read_to_string(&published).unwrap(), "AAAABBBB");
    }

    #[tokio::test]
    async fn size_mismatch_is_rejected() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "a.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a.txt", 0, Bytes::from_static(b"short")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 999,
            sha256: None,
            chunk_count: 1,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        let err = complete_upload(&state, "ds1", upload_id, &req).await.unwrap_err();
        assert!(matches!(err, AppError::SizeMismatch { .. }));
    }

    #[tokio::test]
    async fn hash_mismatch_is_rejected() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "a.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a.txt", 0, Bytes::from_static(b"hello world")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 11,
            sha256: Some("0".repeat(64)),
            chunk_count: 1,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        let err = complete_upload(&state, "ds1", upload_id, &req).await.unwrap_err();
        assert!(matches!(err, AppError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn missing_chunk_is_a_chunk_count_mismatch() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "a.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a.txt", 0, Bytes::from_static(b"only-one")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 8,
            sha256: None,
            chunk_count: 3,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        let err = complete_upload(&state, "ds1", upload_id, &req).await.unwrap_err();
        assert!(matches!(err, AppError::ChunkCountMismatch { .. }));
    }

    #[tokio::test]
    async fn resending_a_chunk_overwrites_the_earlier_attempt() {
        let (_dir, state) = test_state();
        let upload_id = upload_session::create(&state, "ds1", "c1", "a.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a.txt", 0, Bytes::from_static(b"wrong-bytes")).await.unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "a.txt", 0, Bytes::from_static(b"right")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 5,
            sha256: None,
            chunk_count: 1,
            last_write_utc: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        };

        let entry = complete_upload(&state, "ds1", upload_id, &req).await.unwrap();
        assert_eq!(entry.size, 5);
    }

    #[tokio::test]
    async fn stale_complete_is_an_idempotent_noop() {
        let (_dir, state) = test_state();
        let ds_dir = state.config.inbound_root.join("ds1");
        std::fs::create_dir_all(&ds_dir).unwrap();
        std::fs::write(ds_dir.join("x.txt"), b"OLDSERVER1").unwrap();
        let newer = chrono::Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        std::fs::File::options()
            .write(true)
            .open(ds_dir.join("x.txt"))
            .unwrap()
            .set_modified(newer.into())
            .unwrap();

        let upload_id = upload_session::create(&state, "ds1", "c1", "x.txt").unwrap();
        save_chunk(&state, "ds1", "c1", upload_id, "x.txt", 0, Bytes::from_static(b"NEW")).await.unwrap();

        let req = CompleteRequest {
            dataset_id: "ds1".into(),
            client_id: "c1".into(),
            expected_size: 3,
            sha256: None,
            chunk_count: 1,
            last_write_utc: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        };

        complete_upload(&state, "ds1", upload_id, &req).await.unwrap();
        assert_eq!(std::fs::read_to_string(ds_dir.join("x.txt")).unwrap(), "OLDSERVER1");
        assert!(upload_session::get(&state, "ds1", upload_id).is_err());
    }
}
