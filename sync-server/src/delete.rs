//! DeleteEngine (spec §4.7): applies a client's explicit delete list under
//! Last-Writer-Wins semantics.

use crate::error::AppError;
use crate::state::AppState;
use chrono::{DateTime, Utc};
use sync_core::path::validate_relative_path;
use sync_core::protocol::{DeletePolicy, DeleteRequest};

/// Remove paths in `req.paths` from the dataset root under the configured
/// `DeletePolicy`, guarding each against traversal and serializing with any
/// in-flight publish of the same path. Deleting a path that is already absent
/// is not an error — the end state the client wants (the file gone) already
/// holds.
pub async fn apply(state: &AppState, req: &DeleteRequest) -> Result<Vec<String>, AppError> {
    // Validate every path before touching the filesystem (spec §4.7): a
    // request with one bad path must fail as a whole, not partially apply.
    let mut normalized_paths = Vec::with_capacity(req.paths.len());
    for raw_path in &req.paths {
        let normalized = validate_relative_path(raw_path)
            .map_err(|e| AppError::InvalidPath(format!("{raw_path}: {e}")))?;
        normalized_paths.push(normalized);
    }

    let deleted_at_utc = match state.config.delete_strategy {
        DeletePolicy::LwwDelete => Some(
            req.deleted_at_utc
                .ok_or_else(|| AppError::MissingField("deletedAtUtc".into()))?,
        ),
        DeletePolicy::Disabled => None,
    };

    let mut deleted = Vec::new();

    for normalized in normalized_paths {
        let guard = state.path_lock(&req.dataset_id, &normalized);
        let _lock = guard.lock().await;

        let target = state.config.inbound_root.join(&req.dataset_id).join(&normalized);
        let removed = tokio::task::spawn_blocking(move || -> Result<bool, AppError> {
            remove_if_should_delete(&target, deleted_at_utc)
        })
        .await
        .map_err(|e| anyhow::anyhow!(e))??;

        if removed {
            deleted.push(normalized);
        }
    }

    Ok(deleted)
}

/// `VersionPolicy.ShouldDelete` (spec §4.7): absent is a silent no-op; under
/// `LwwDelete` the target is removed only if `deleted_at_utc` strictly exceeds
/// the target's current mtime, so a server-side write racing the delete wins.
fn remove_if_should_delete(
    target: &std::path::Path,
    deleted_at_utc: Option<DateTime<Utc>>,
) -> Result<bool, AppError> {
    let metadata = match std::fs::metadata(target) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    if let Some(deleted_at_utc) = deleted_at_utc {
        let mtime: DateTime<Utc> = metadata.modified()?.into();
        if deleted_at_utc <= mtime {
            return Ok(false);
        }
    }

    match std::fs::remove_file(target) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
