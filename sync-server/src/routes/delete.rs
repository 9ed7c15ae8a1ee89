use crate::auth;
use crate::delete;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::Arc;
use sync_core::protocol::DeleteRequest;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/sync/delete", post(post_delete))
}

/// Applies an explicit delete list (spec §4.7). Ignored entirely when the
/// server's `delete_strategy` is `Disabled` — mirror-delete must be an
/// opt-in the operator controls, not something a client can force on.
async fn post_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<DeleteRequest>,
) -> Result<StatusCode, AppError> {
    auth::authorize(&state.config.api_keys, &headers, &req.dataset_id, &req.client_id)?;

    if state.config.delete_strategy == sync_core::protocol::DeletePolicy::Disabled {
        return Ok(StatusCode::NO_CONTENT);
    }

    let deleted = delete::apply(&state, &req).await?;
    tracing::info!(dataset_id = %req.dataset_id, count = deleted.len(), "applied deletes");
    Ok(StatusCode::NO_CONTENT)
}
