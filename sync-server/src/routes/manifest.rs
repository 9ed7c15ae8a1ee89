use crate::auth;
use crate::diff;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use sync_core::protocol::{DiffResponse, ManifestRequest};

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/sync/manifest", post(post_manifest))
}

/// Accepts a client's manifest and replies with the upload/delete sets it
/// must act on (spec §4.4, §6).
async fn post_manifest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ManifestRequest>,
) -> Result<Json<DiffResponse>, AppError> {
    auth::authorize(&state.config.api_keys, &headers, &req.dataset_id, &req.client_id)?;

    tracing::debug!(dataset_id = %req.dataset_id, client_id = %req.client_id, files = req.files.len(), "received manifest");
    let response = diff::diff(&state, &req)?;
    Ok(Json(response))
}
