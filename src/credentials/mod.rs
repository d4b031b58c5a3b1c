//! Credential persistence for a pairing attempt.
//!
//! The protocol's credential bundle is opaque to this crate apart from the
//! `registered` flag. A [`CredentialStore`] loads and saves it inside a
//! per-attempt [`CredentialsDir`]; [`SessionCredentials`] binds a store to one
//! directory and serializes saves so concurrent updates never interleave.

mod dir;
mod file;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::CredentialError;

pub use dir::{CredentialsDir, DirectoryLease};
pub use file::FileCredentialStore;

/// Name of the credentials file inside a credentials directory.
pub const CREDENTIALS_FILE: &str = "creds.json";

/// Authentication state of one protocol session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialState {
    /// Whether the device has completed pairing.
    #[serde(default)]
    pub registered: bool,
    /// The account identity, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<String>,
    /// Protocol-specific key material.
    #[serde(default, flatten)]
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl CredentialState {
    /// A fresh, unregistered state.
    pub fn fresh() -> Self {
        Self::default()
    }
}

/// Load/save pair for credential state, keyed by directory.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the state stored in `dir`, or a fresh state when none exists.
    async fn load(&self, dir: &Path) -> Result<CredentialState, CredentialError>;

    /// Persist `state` into `dir`. Saving the same state twice is a no-op in effect.
    async fn save(&self, dir: &Path, state: &CredentialState) -> Result<(), CredentialError>;
}

/// A credential store bound to one attempt's directory.
pub struct SessionCredentials {
    store: Arc<dyn CredentialStore>,
    dir: CredentialsDir,
    save_slot: Mutex<()>,
}

impl SessionCredentials {
    /// Create the directory if needed and load its state.
    pub async fn open(
        store: Arc<dyn CredentialStore>,
        dir: CredentialsDir,
    ) -> Result<(Self, CredentialState), CredentialError> {
        dir.ensure().await?;
        let state = store.load(dir.path()).await?;
        let credentials = Self {
            store,
            dir,
            save_slot: Mutex::new(()),
        };
        Ok((credentials, state))
    }

    /// Persist an updated state. Saves are applied one at a time in call order.
    pub async fn persist(&self, state: CredentialState) -> Result<(), CredentialError> {
        let _slot = self.save_slot.lock().await;
        self.store.save(self.dir.path(), &state).await
    }
}
