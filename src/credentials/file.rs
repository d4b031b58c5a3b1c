//! JSON file backend for [`CredentialStore`].

use std::io;
use std::path::Path;

use async_trait::async_trait;

use super::{CREDENTIALS_FILE, CredentialState, CredentialStore};
use crate::error::CredentialError;

/// Stores credential state as `creds.json` inside the attempt directory.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// reader never observes a half-written file.
#[derive(Debug, Clone, Default)]
pub struct FileCredentialStore;

impl FileCredentialStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, dir: &Path) -> Result<CredentialState, CredentialError> {
        let path = dir.join(CREDENTIALS_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No stored credentials, starting fresh");
                return Ok(CredentialState::fresh());
            }
            Err(e) => {
                return Err(CredentialError::ReadFailed {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        serde_json::from_slice(&bytes).map_err(|e| CredentialError::Corrupted {
            path,
            reason: e.to_string(),
        })
    }

    async fn save(&self, dir: &Path, state: &CredentialState) -> Result<(), CredentialError> {
        let path = dir.join(CREDENTIALS_FILE);
        let tmp = dir.join(format!("{CREDENTIALS_FILE}.tmp"));
        let write_err = |e: &dyn std::fmt::Display| CredentialError::WriteFailed {
            path: path.clone(),
            reason: e.to_string(),
        };

        let bytes = serde_json::to_vec_pretty(state).map_err(|e| write_err(&e))?;
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| write_err(&e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| write_err(&e))?;
        Ok(())
    }
}
