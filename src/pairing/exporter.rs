//! Export of a paired session's credentials.
//!
//! Uploads the credentials file, derives a session id from the storage URL
//! and sends it to the paired account as an image caption. Every failure is
//! absorbed into [`ExportResult`]; nothing here returns an error.

use std::path::Path;
use std::sync::Arc;

use crate::config::ExportConfig;
use crate::connection::{Connection, MessageContent, SendOptions, SentMessage};
use crate::storage::BlobUploader;

/// Sent in place of a session id when none could be derived.
pub const SESSION_ID_ERROR_MARKER: &str = "Error occurred";

/// Outcome of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    /// The session id was delivered.
    Exported { session_id: String },
    /// The caption was delivered carrying the error marker.
    Degraded { reason: String },
    /// The caption could not be delivered.
    Failed { reason: String },
}

/// Derive the session id from an upload URL.
///
/// Returns `session_prefix` followed by the text between the first
/// `storage_prefix` and the next one (or the end of the URL), or `None` when
/// the URL does not contain `storage_prefix`.
pub fn derive_session_id(url: &str, storage_prefix: &str, session_prefix: &str) -> Option<String> {
    let start = url.find(storage_prefix)? + storage_prefix.len();
    let rest = &url[start..];
    let id = match rest.find(storage_prefix) {
        Some(end) if !storage_prefix.is_empty() => &rest[..end],
        _ => rest,
    };
    Some(format!("{}{}", session_prefix, id))
}

/// Caption carrying the session id.
pub fn session_caption(session_id: &str) -> String {
    format!("*Session ID*\n\n{}", session_id)
}

pub struct SessionExporter {
    uploader: Arc<dyn BlobUploader>,
    config: ExportConfig,
}

impl SessionExporter {
    pub fn new(uploader: Arc<dyn BlobUploader>, config: ExportConfig) -> Self {
        Self { uploader, config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub async fn export(
        &self,
        credentials_file: &Path,
        connection: &dyn Connection,
        own_id: &str,
        quoted: Option<SentMessage>,
    ) -> ExportResult {
        let derived = match self.uploader.upload(credentials_file).await {
            Ok(url) => derive_session_id(
                &url,
                &self.config.storage_url_prefix,
                &self.config.session_prefix,
            )
            .ok_or_else(|| format!("upload URL {url} is not a recognized storage link")),
            Err(e) => Err(format!("upload failed: {e}")),
        };

        let session_id = match &derived {
            Ok(id) => id.as_str(),
            Err(reason) => {
                tracing::error!(reason = %reason, "Could not derive session id");
                SESSION_ID_ERROR_MARKER
            }
        };

        let content = MessageContent::Image {
            url: self.config.image_url.clone(),
            caption: session_caption(session_id),
        };
        if let Err(e) = connection
            .send_message(own_id, content, SendOptions { quoted })
            .await
        {
            tracing::error!(error = %e, "Failed to deliver session id");
            return ExportResult::Failed {
                reason: e.to_string(),
            };
        }

        match derived {
            Ok(session_id) => ExportResult::Exported { session_id },
            Err(reason) => ExportResult::Degraded { reason },
        }
    }
}
