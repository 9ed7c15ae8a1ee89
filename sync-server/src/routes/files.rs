use crate::auth;
use crate::error::AppError;
use crate::merge;
use crate::state::AppState;
use axum::extract::{Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{post, put};
use axum::Router;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use sync_core::base64url_decode;
use sync_core::protocol::CompleteRequest;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/sync/files/{b64path}/uploads/{upload_id}/chunks/{index}",
            put(put_chunk),
        )
        .route(
            "/api/sync/files/{b64path}/uploads/{upload_id}/complete",
            post(post_complete),
        )
}

#[derive(Debug, Deserialize)]
struct ChunkQuery {
    #[serde(rename = "datasetId")]
    dataset_id: String,
    #[serde(rename = "clientId")]
    client_id: String,
}

/// Streams one chunk's raw body straight to disk (spec §4.5, §6). Resending
/// the same `(upload_id, index)` pair is always accepted and simply replaces
/// the prior attempt.
async fn put_chunk(
    State(state): State<Arc<AppState>>,
    Path((b64path, upload_id, index)): Path<(String, Uuid, u32)>,
    Query(query): Query<ChunkQuery>,
    headers: HeaderMap,
    request: Request,
) -> Result<StatusCode, AppError> {
    auth::authorize(&state.config.api_keys, &headers, &query.dataset_id, &query.client_id)?;
    let relpath = base64url_decode(&b64path).map_err(|e| AppError::InvalidPath(e.to_string()))?;

    let mut stream = request.into_body().into_data_stream();
    let mut bytes = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| anyhow::anyhow!("failed reading chunk body: {e}"))?;
        bytes.extend_from_slice(&chunk);
    }

    merge::save_chunk(&state, &query.dataset_id, &query.client_id, upload_id, &relpath, index, bytes.into())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Assembles, verifies, and publishes the file once all chunks have landed
/// (spec §4.6).
async fn post_complete(
    State(state): State<Arc<AppState>>,
    Path((_b64path, upload_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    axum::Json(req): axum::Json<CompleteRequest>,
) -> Result<StatusCode, AppError> {
    auth::authorize(&state.config.api_keys, &headers, &req.dataset_id, &req.client_id)?;

    let entry = merge::complete_upload(&state, &req.dataset_id, upload_id, &req).await?;
    tracing::info!(dataset_id = %req.dataset_id, path = %entry.path, size = entry.size, "published file");
    Ok(StatusCode::NO_CONTENT)
}
