//! Unauthenticated liveness probe, mirrored from the reference agent's own
//! health endpoint so load balancers and the client's own retry logic have
//! somewhere cheap to check before attempting a full sync round.

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
