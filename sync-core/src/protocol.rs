//! Wire payload shapes for the `/api/sync/*` endpoints (spec §6), shared by both
//! the server and the client so the two processes cannot disagree about field
//! names or casing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One file as reported by the client's manifest, or echoed back describing a
/// file the server already holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
    #[serde(rename = "lastWriteUtc")]
    pub last_write_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRequest {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadInstruction {
    pub path: String,
    #[serde(rename = "uploadId")]
    pub upload_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DiffResponse {
    pub upload: Vec<UploadInstruction>,
    pub delete: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "expectedSize")]
    pub expected_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(rename = "chunkCount")]
    pub chunk_count: u32,
    #[serde(rename = "lastWriteUtc")]
    pub last_write_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteRequest {
    #[serde(rename = "datasetId")]
    pub dataset_id: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub paths: Vec<String>,
    #[serde(rename = "deletedAtUtc", default, skip_serializing_if = "Option::is_none")]
    pub deleted_at_utc: Option<DateTime<Utc>>,
}

/// Server-side delete policy (spec §3, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeletePolicy {
    Disabled,
    LwwDelete,
}

impl Default for DeletePolicy {
    fn default() -> Self {
        DeletePolicy::Disabled
    }
}

pub const API_KEY_HEADER: &str = "X-Api-Key";
