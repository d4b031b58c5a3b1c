//! Per-attempt credentials directory and its scoped removal.

use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use super::CREDENTIALS_FILE;
use crate::error::CredentialError;

/// The directory holding one pairing attempt's credential files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialsDir {
    path: PathBuf,
}

impl CredentialsDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<root>/<attempt_id>`.
    pub fn for_attempt(root: &Path, attempt_id: Uuid) -> Self {
        Self::new(root.join(attempt_id.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the credentials file uploaded on export.
    pub fn credentials_file(&self) -> PathBuf {
        self.path.join(CREDENTIALS_FILE)
    }

    /// Create the directory (and parents) if absent.
    pub async fn ensure(&self) -> Result<(), CredentialError> {
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(|e| CredentialError::DirectoryCreationFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Remove the directory recursively. Returns `false` if it was already gone.
    pub async fn remove(&self) -> io::Result<bool> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Take a lease that deletes the directory when released or dropped.
    pub fn lease(&self) -> DirectoryLease {
        DirectoryLease {
            path: Some(self.path.clone()),
        }
    }
}

/// Guarantees removal of a credentials directory.
///
/// Call [`DirectoryLease::release`] for async removal with error reporting.
/// If the lease is dropped unreleased (panic, task cancellation), the
/// directory is removed synchronously in [`Drop`].
#[derive(Debug)]
#[must_use = "dropping the lease removes the directory immediately"]
pub struct DirectoryLease {
    path: Option<PathBuf>,
}

impl DirectoryLease {
    /// Remove the directory now. A missing directory is not an error.
    pub async fn release(mut self) -> io::Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Give up the lease without removing the directory.
    pub fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for DirectoryLease {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            // Best-effort; the async path reports errors.
            let _ = std::fs::remove_dir_all(&path);
        }
    }
}
