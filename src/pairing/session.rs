//! The process-wide record of the active session.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use uuid::Uuid;

use super::lifecycle::LifecycleState;
use crate::connection::Connection;
use crate::credentials::CredentialsDir;

/// The live session instance owned by the coordinator.
pub struct ActiveSession {
    attempt_id: Uuid,
    dir: CredentialsDir,
    registered: bool,
    state: LifecycleState,
    started_at: DateTime<Utc>,
    connection: Arc<dyn Connection>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl ActiveSession {
    pub fn new(
        attempt_id: Uuid,
        dir: CredentialsDir,
        registered: bool,
        connection: Arc<dyn Connection>,
        shutdown: oneshot::Sender<()>,
    ) -> Self {
        Self {
            attempt_id,
            dir,
            registered,
            state: LifecycleState::Connecting,
            started_at: Utc::now(),
            connection,
            shutdown: Some(shutdown),
        }
    }

    pub fn attempt_id(&self) -> Uuid {
        self.attempt_id
    }

    /// Stop this session.
    ///
    /// Signals its lifecycle loop, which ends the connection and cleans up.
    /// If the loop has already exited, the connection is ended here and the
    /// directory removed unless `keep_dir` is set.
    pub async fn retire(mut self, keep_dir: bool) {
        let delivered = self
            .shutdown
            .take()
            .is_some_and(|tx| tx.send(()).is_ok());
        if delivered {
            return;
        }

        self.connection.end().await;
        if !keep_dir {
            if let Err(e) = self.dir.remove().await {
                tracing::warn!(
                    attempt_id = %self.attempt_id,
                    error = %e,
                    "Failed to remove credentials directory of retired session"
                );
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            attempt_id: self.attempt_id,
            state: self.state,
            registered: self.registered,
            directory: self.dir.path().to_path_buf(),
            started_at: self.started_at,
        }
    }
}

/// Serializable view of the active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub attempt_id: Uuid,
    pub state: LifecycleState,
    pub registered: bool,
    pub directory: PathBuf,
    pub started_at: DateTime<Utc>,
}

/// Holds at most one [`ActiveSession`].
#[derive(Clone, Default)]
pub struct SessionManager {
    slot: Arc<Mutex<Option<ActiveSession>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `session` the active one, retiring any previous session.
    ///
    /// A previous record for the same attempt (a reconnect) keeps its
    /// directory, since the new instance reuses it.
    pub async fn install(&self, session: ActiveSession) -> Option<Uuid> {
        let new_id = session.attempt_id;
        let previous = self.slot.lock().await.replace(session);
        let previous = previous?;
        let previous_id = previous.attempt_id;
        if previous_id != new_id {
            tracing::info!(
                previous = %previous_id,
                attempt_id = %new_id,
                "Replacing active session with a newer attempt"
            );
        }
        previous.retire(previous_id == new_id).await;
        Some(previous_id)
    }

    /// Remove the record if it belongs to `attempt_id`.
    pub async fn clear(&self, attempt_id: Uuid) -> Option<ActiveSession> {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(session) if session.attempt_id == attempt_id => slot.take(),
            _ => None,
        }
    }

    pub async fn is_active(&self, attempt_id: Uuid) -> bool {
        self.slot
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.attempt_id == attempt_id)
    }

    /// Record a lifecycle transition for the active attempt.
    pub async fn set_state(&self, attempt_id: Uuid, state: LifecycleState) {
        if let Some(session) = self.slot.lock().await.as_mut() {
            if session.attempt_id == attempt_id {
                session.state = state;
            }
        }
    }

    /// Mark the active attempt as registered.
    pub async fn set_registered(&self, attempt_id: Uuid) {
        if let Some(session) = self.slot.lock().await.as_mut() {
            if session.attempt_id == attempt_id {
                session.registered = true;
            }
        }
    }

    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        self.slot.lock().await.as_ref().map(ActiveSession::snapshot)
    }
}
