pub mod delete;
pub mod files;
pub mod health;
pub mod manifest;

use crate::state::AppState;
use axum::Router;
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sync/health", axum::routing::get(health::health))
        .merge(manifest::router())
        .merge(files::router())
        .merge(delete::router())
        .with_state(state)
}
