//! SyncRunner (spec §4.9): orchestrates one end-to-end sync pass — build
//! manifest, diff against the server, push uploads bounded-parallel, apply
//! deletes, persist state.

use crate::config::ClientConfig;
use crate::manifest_builder;
use crate::protocol::SyncClient;
use crate::state_store::StateStore;
use crate::transfer::progress::ProgressTracker;
use crate::utils::errors::{ClientError, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use sync_core::protocol::UploadInstruction;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Summary of one sync pass, returned for logging/testing.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub uploaded: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct SyncRunner {
    config: ClientConfig,
    client: SyncClient,
}

impl SyncRunner {
    pub fn new(config: ClientConfig) -> Self {
        let client = SyncClient::new(&config);
        Self { config, client }
    }

    /// Runs a single sync pass. `cancel` allows an in-progress pass to be
    /// interrupted between files (e.g. on SIGTERM); chunks already in flight
    /// for the current file are allowed to finish.
    pub async fn run_once(&self, cancel: CancellationToken) -> Result<SyncReport> {
        let mut state = StateStore::load(&self.config.sync.state_path)?;

        let manifest = manifest_builder::build(&self.config.sync.root, self.config.sync.always_hash)?;
        tracing::info!(files = manifest.len(), "built local manifest");

        let local_deletions = state.local_deletions(&manifest);

        let diff = self.client.post_manifest(manifest.clone()).await?;
        tracing::info!(
            upload = diff.upload.len(),
            delete = diff.delete.len(),
            "server diff received"
        );

        let total_bytes: u64 = manifest
            .iter()
            .filter(|f| diff.upload.iter().any(|u| u.path.eq_ignore_ascii_case(&f.path)))
            .map(|f| f.size)
            .sum();
        let mut tracker = ProgressTracker::new(total_bytes, diff.upload.len());

        let semaphore = Arc::new(Semaphore::new(self.config.sync.max_parallel_uploads));
        let mut handles = Vec::new();
        let mut failed = 0usize;
        let mut uploaded = 0usize;

        for instruction in diff.upload {
            if cancel.is_cancelled() {
                break;
            }
            let Some(entry) = manifest.iter().find(|f| f.path.eq_ignore_ascii_case(&instruction.path)).cloned()
            else {
                continue;
            };

            let client = self.client.clone();
            let permit = semaphore.clone().acquire_owned().await.map_err(|e| {
                ClientError::Config(format!("semaphore closed unexpectedly: {e}"))
            })?;
            let root = self.config.sync.root.clone();
            let chunk_size = self.config.sync.chunk_size;

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let result = upload_one(&client, &root, chunk_size, &instruction, entry.last_write_utc).await;
                (instruction.path, result)
            }));
        }

        // Spec §4.9/§7: failure of one file aborts the whole round and the
        // state file is left untouched so the next round recomputes from
        // scratch. We still await every in-flight task so a cancelled or
        // failed upload never races the caller tearing down the process.
        let mut first_failure: Option<ClientError> = None;
        for handle in handles {
            let (path, result) = handle.await.map_err(|e| ClientError::Config(format!("upload task panicked: {e}")))?;
            match result {
                Ok(size) => {
                    uploaded += 1;
                    tracker.update(tracker.progress().transferred_bytes + size);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(path = %path, error = %e, "upload failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let mut deleted = 0usize;
        if !diff.delete.is_empty() {
            let count = diff.delete.len();
            self.client.delete(diff.delete).await?;
            deleted += count;
        }
        if !local_deletions.is_empty() {
            tracing::debug!(count = local_deletions.len(), "reporting local deletions to server");
            let count = local_deletions.len();
            self.client.delete(local_deletions).await?;
            deleted += count;
        }

        state.record_sync(manifest, Utc::now());
        state.save(&self.config.sync.state_path)?;

        Ok(SyncReport { uploaded, deleted, failed })
    }
}

/// Uploads a single file's chunks and completes the session, returning the
/// number of bytes sent. Any failure is reported as `UploadFailed` so the
/// caller can abort the round with the offending path attached.
async fn upload_one(
    client: &SyncClient,
    root: &std::path::Path,
    chunk_size: usize,
    instruction: &UploadInstruction,
    last_write_utc: chrono::DateTime<Utc>,
) -> Result<u64> {
    let path = instruction.path.clone();
    upload_one_inner(client, root, chunk_size, instruction, last_write_utc)
        .await
        .map_err(|e| ClientError::UploadFailed { path, attempts: 1, source: Box::new(e) })
}

async fn upload_one_inner(
    client: &SyncClient,
    root: &std::path::Path,
    chunk_size: usize,
    instruction: &UploadInstruction,
    last_write_utc: chrono::DateTime<Utc>,
) -> Result<u64> {
    let abs_path = root.join(&instruction.path);
    let bytes = tokio::fs::read(&abs_path).await?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());

    let mut index = 0u32;
    if bytes.is_empty() {
        // An empty file is still one (empty) chunk — the server's chunk
        // count check must see chunk 0 present.
        client.put_chunk(&instruction.path, instruction.upload_id, 0, bytes.clone().into()).await?;
        index = 1;
    } else {
        for chunk in bytes.chunks(chunk_size.max(1)) {
            client
                .put_chunk(&instruction.path, instruction.upload_id, index, chunk.to_vec().into())
                .await?;
            index += 1;
        }
    }
    let chunk_count = index;

    client
        .complete_upload(
            &instruction.path,
            instruction.upload_id,
            bytes.len() as u64,
            Some(sha256),
            chunk_count,
            last_write_utc,
        )
        .await?;

    Ok(bytes.len() as u64)
}
