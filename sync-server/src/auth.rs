//! AuthGate (spec §4.8): validates the pre-shared key carried in `X-Api-Key`.

use crate::config::ApiKeys;
use crate::error::AppError;
use axum::http::HeaderMap;
use ring::constant_time;
use sync_core::API_KEY_HEADER;

/// Returns `Ok(())` iff the presented key matches the mapping for `dataset_id`,
/// falling back to the `client_id` mapping when no dataset mapping exists.
/// Comparison is constant-time over byte strings.
pub fn authorize(
    keys: &ApiKeys,
    headers: &HeaderMap,
    dataset_id: &str,
    client_id: &str,
) -> Result<(), AppError> {
    if dataset_id.is_empty() || client_id.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let presented = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let expected = keys
        .dataset_keys
        .get(dataset_id)
        .or_else(|| keys.client_keys.get(client_id))
        .ok_or(AppError::Unauthorized)?;

    constant_time::verify_slices_are_equal(presented.as_bytes(), expected.as_bytes())
        .map_err(|_| AppError::Unauthorized)
}
