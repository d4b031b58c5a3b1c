//! Remote blob storage for exported credential files.

use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::UploadError;

/// Uploads a local file and returns a URL where it can be retrieved.
#[async_trait]
pub trait BlobUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String, UploadError>;
}

/// Posts the file as a multipart form to an HTTP storage gateway.
///
/// The gateway must answer with JSON of the form `{"url": "..."}`.
pub struct HttpUploader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpUploader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl BlobUploader for HttpUploader {
    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("creds.json")
            .to_string();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(file_name)
            .mime_str("application/json")
            .map_err(|e| UploadError::RequestFailed(format!("Failed to create multipart: {}", e)))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected { status, body });
        }

        #[derive(Deserialize)]
        struct UploadResponse {
            url: String,
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))?;

        tracing::debug!(url = %parsed.url, "Credentials uploaded");
        Ok(parsed.url)
    }
}
