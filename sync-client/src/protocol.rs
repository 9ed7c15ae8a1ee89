//! Thin HTTP client for the sync-server's `/api/sync/*` endpoints.

use crate::config::ClientConfig;
use crate::utils::errors::{ClientError, Result};
use bytes::Bytes;
use reqwest::Client;
use sync_core::base64url_encode;
use sync_core::protocol::{CompleteRequest, DeleteRequest, DiffResponse, FileEntry, ManifestRequest, API_KEY_HEADER};
use uuid::Uuid;

#[derive(Clone)]
pub struct SyncClient {
    http: Client,
    base_url: String,
    dataset_id: String,
    client_id: String,
    api_key: String,
}

impl SyncClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            http: Client::new(),
            base_url: config.server.url.trim_end_matches('/').to_string(),
            dataset_id: config.server.dataset_id.clone(),
            client_id: config.client.id.clone(),
            api_key: config.server.api_key.clone(),
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::ServerRejected { status, body })
    }

    pub async fn post_manifest(&self, files: Vec<FileEntry>) -> Result<DiffResponse> {
        let req = ManifestRequest {
            dataset_id: self.dataset_id.clone(),
            client_id: self.client_id.clone(),
            files,
        };

        let response = self
            .http
            .post(format!("{}/api/sync/manifest", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&req)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.json().await?)
    }

    pub async fn put_chunk(&self, relpath: &str, upload_id: Uuid, index: u32, bytes: Bytes) -> Result<()> {
        let b64path = base64url_encode(relpath);
        let response = self
            .http
            .put(format!(
                "{}/api/sync/files/{}/uploads/{}/chunks/{}",
                self.base_url, b64path, upload_id, index
            ))
            .query(&[("datasetId", &self.dataset_id), ("clientId", &self.client_id)])
            .header(API_KEY_HEADER, &self.api_key)
            .body(bytes)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    pub async fn complete_upload(
        &self,
        relpath: &str,
        upload_id: Uuid,
        expected_size: u64,
        sha256: Option<String>,
        chunk_count: u32,
        last_write_utc: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let b64path = base64url_encode(relpath);
        let req = CompleteRequest {
            dataset_id: self.dataset_id.clone(),
            client_id: self.client_id.clone(),
            expected_size,
            sha256,
            chunk_count,
            last_write_utc,
        };

        let response = self
            .http
            .post(format!(
                "{}/api/sync/files/{}/uploads/{}/complete",
                self.base_url, b64path, upload_id
            ))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&req)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    /// Posts a delete request for `paths`. The server responds `204 No Content`
    /// on success (spec §6) — it never reports which of the requested paths
    /// were actually removed (a path already absent, or retained by the
    /// server's own LWW check, is silently skipped server-side), so the
    /// caller only learns that the request was accepted.
    pub async fn delete(&self, paths: Vec<String>) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let req = DeleteRequest {
            dataset_id: self.dataset_id.clone(),
            client_id: self.client_id.clone(),
            paths,
            deleted_at_utc: Some(chrono::Utc::now()),
        };

        let response = self
            .http
            .post(format!("{}/api/sync/delete", self.base_url))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&req)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
