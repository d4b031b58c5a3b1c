//! Connection lifecycle state machine and its event loop.
//!
//! Each session instance gets one [`SessionRunner`] consuming the
//! connection's event stream. Events are handled strictly one at a time:
//!
//! ```text
//!   CONNECTING ──open──▶ OPEN ──settle──▶ export ──▶ cleanup ──▶ done
//!       │                  │
//!       └──close───────────┴──▶ CLOSED_TRANSIENT  (reconnect)
//!                              CLOSED_TERMINAL   (release)
//! ```
//!
//! Export begins once the open settle delay has elapsed. From that point the
//! export and the directory removal always run to completion, and any close
//! observed meanwhile is terminal. Reconnection therefore never overlaps the
//! export-then-delete sequence.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::oneshot;

use super::coordinator::{Attempt, PairingCoordinator};
use super::exporter::ExportResult;
use crate::connection::{
    Connection, ConnectionEvent, DisconnectReason, EventStream, MessageContent, SendOptions,
    is_transient,
};
use crate::credentials::{CredentialState, SessionCredentials};

/// State of one session instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Connecting,
    Open,
    ClosedTransient,
    ClosedTerminal,
}

impl LifecycleState {
    pub fn on_open(self) -> Self {
        match self {
            LifecycleState::Connecting | LifecycleState::Open => LifecycleState::Open,
            closed => closed,
        }
    }

    /// Classify a close. Once export has begun every close is terminal.
    pub fn on_close(self, reason: Option<DisconnectReason>, export_begun: bool) -> Self {
        match self {
            LifecycleState::Connecting | LifecycleState::Open
                if !export_begun && is_transient(reason) =>
            {
                LifecycleState::ClosedTransient
            }
            LifecycleState::Connecting | LifecycleState::Open => LifecycleState::ClosedTerminal,
            closed => closed,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(
            self,
            LifecycleState::ClosedTransient | LifecycleState::ClosedTerminal
        )
    }
}

/// Drives one session instance from construction to a closed state.
pub(crate) struct SessionRunner {
    coordinator: PairingCoordinator,
    attempt: Attempt,
    credentials: SessionCredentials,
    connection: Arc<dyn Connection>,
    events: EventStream,
    events_closed: bool,
    shutdown: oneshot::Receiver<()>,
    state: LifecycleState,
    export_begun: bool,
}

impl SessionRunner {
    pub(crate) fn new(
        coordinator: PairingCoordinator,
        attempt: Attempt,
        credentials: SessionCredentials,
        connection: Arc<dyn Connection>,
        events: EventStream,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            coordinator,
            attempt,
            credentials,
            connection,
            events,
            events_closed: false,
            shutdown,
            state: LifecycleState::Connecting,
            export_begun: false,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut self.shutdown => {
                    self.stop().await;
                    return;
                }
                event = self.events.recv() => event,
            };

            match event {
                Some(ConnectionEvent::CredentialsUpdated(state)) => self.persist(state).await,
                Some(ConnectionEvent::Open { own_id }) => {
                    self.handle_open(own_id).await;
                    return;
                }
                Some(ConnectionEvent::Close { reason }) => {
                    self.handle_close(reason).await;
                    return;
                }
                None => {
                    tracing::warn!(
                        attempt_id = %self.attempt.id,
                        "Connection event stream ended without a close event"
                    );
                    self.handle_close(None).await;
                    return;
                }
            }
        }
    }

    async fn transition(&mut self, next: LifecycleState) {
        if next != self.state {
            tracing::debug!(
                attempt_id = %self.attempt.id,
                from = ?self.state,
                to = ?next,
                "Lifecycle transition"
            );
            self.state = next;
            self.coordinator
                .sessions()
                .set_state(self.attempt.id, next)
                .await;
        }
    }

    async fn persist(&mut self, state: CredentialState) {
        let registered = state.registered;
        match self.credentials.persist(state).await {
            Ok(()) => {
                if registered {
                    self.coordinator
                        .sessions()
                        .set_registered(self.attempt.id)
                        .await;
                }
            }
            Err(e) => tracing::error!(
                attempt_id = %self.attempt.id,
                error = %e,
                "Failed to persist credentials"
            ),
        }
    }

    /// Wait out the open settle delay, persisting credential updates.
    ///
    /// Export has not begun yet, so a close or a shutdown request ends the
    /// wait early.
    async fn wait_for_settle(&mut self, delay: Duration) -> Settle {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return Settle::Superseded,
                _ = &mut sleep => return Settle::Elapsed,
                event = self.events.recv(), if !self.events_closed => match event {
                    Some(ConnectionEvent::CredentialsUpdated(state)) => self.persist(state).await,
                    Some(ConnectionEvent::Close { reason }) => return Settle::Closed(reason),
                    Some(ConnectionEvent::Open { .. }) => {}
                    None => {
                        self.events_closed = true;
                        return Settle::Closed(None);
                    }
                },
            }
        }
    }

    /// Wait `delay` after export has begun, absorbing events.
    async fn pump(&mut self, delay: Duration) {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                event = self.events.recv(), if !self.events_closed => match event {
                    Some(event) => self.absorb(event).await,
                    None => self.events_closed = true,
                },
            }
        }
    }

    /// Handle every event already queued, without waiting.
    async fn drain(&mut self) {
        while !self.events_closed {
            match self.events.try_recv() {
                Ok(event) => self.absorb(event).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => self.events_closed = true,
            }
        }
    }

    async fn absorb(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::CredentialsUpdated(state) => self.persist(state).await,
            ConnectionEvent::Close { reason } => {
                tracing::warn!(
                    attempt_id = %self.attempt.id,
                    reason = %describe(reason),
                    "Connection closed during export; not reconnecting"
                );
                let next = self.state.on_close(reason, self.export_begun);
                self.transition(next).await;
            }
            ConnectionEvent::Open { .. } => {}
        }
    }

    async fn handle_open(&mut self, own_id: String) {
        let next = self.state.on_open();
        self.transition(next).await;
        tracing::info!(attempt_id = %self.attempt.id, "Connected successfully");

        let delays = self.coordinator.delays();
        match self.wait_for_settle(delays.open_settle).await {
            Settle::Elapsed => {}
            Settle::Closed(reason) => {
                self.handle_close(reason).await;
                return;
            }
            Settle::Superseded => {
                self.stop().await;
                return;
            }
        }

        // From here on the directory is removed no matter how export ends.
        self.export_begun = true;
        let lease = self.attempt.dir.lease();
        let exporter = self.coordinator.exporter();

        let notice = match self
            .connection
            .send_message(
                &own_id,
                MessageContent::Text {
                    text: exporter.config().notice_text.clone(),
                },
                SendOptions::default(),
            )
            .await
        {
            Ok(sent) => Some(sent),
            Err(e) => {
                tracing::warn!(attempt_id = %self.attempt.id, error = %e, "Failed to send notice");
                None
            }
        };

        self.drain().await;
        let result = exporter
            .export(
                &self.attempt.dir.credentials_file(),
                self.connection.as_ref(),
                &own_id,
                notice,
            )
            .await;
        match &result {
            ExportResult::Exported { session_id } => tracing::info!(
                attempt_id = %self.attempt.id,
                session_id = %session_id,
                "Session exported"
            ),
            ExportResult::Degraded { reason } => tracing::warn!(
                attempt_id = %self.attempt.id,
                reason = %reason,
                "Session exported without id"
            ),
            ExportResult::Failed { reason } => tracing::error!(
                attempt_id = %self.attempt.id,
                reason = %reason,
                "Session export failed"
            ),
        }

        self.pump(delays.cleanup).await;
        if let Err(e) = lease.release().await {
            tracing::error!(
                attempt_id = %self.attempt.id,
                error = %e,
                "Failed to remove credentials directory"
            );
        }

        self.drain().await;
        self.connection.end().await;
        self.coordinator.sessions().clear(self.attempt.id).await;
        tracing::info!(attempt_id = %self.attempt.id, "Session finished");
    }

    async fn handle_close(&mut self, reason: Option<DisconnectReason>) {
        let next = self.state.on_close(reason, self.export_begun);
        self.transition(next).await;

        if next == LifecycleState::ClosedTransient {
            tracing::info!(
                attempt_id = %self.attempt.id,
                reason = %describe(reason),
                "Connection lost, reconnecting"
            );
            self.connection.end().await;
            let reconnect = self.coordinator.reconnect(self.attempt.clone());
            tokio::spawn(reconnect);
            return;
        }

        tracing::warn!(
            attempt_id = %self.attempt.id,
            reason = %describe(reason),
            "Disconnected"
        );
        self.connection.end().await;
        self.coordinator.sessions().clear(self.attempt.id).await;
        self.remove_dir().await;
    }

    /// Shutdown requested through the session record.
    async fn stop(&mut self) {
        tracing::info!(attempt_id = %self.attempt.id, "Session retired, stopping");
        self.transition(LifecycleState::ClosedTerminal).await;
        self.connection.end().await;
        self.remove_dir().await;
    }

    async fn remove_dir(&self) {
        if let Err(e) = self.attempt.dir.remove().await {
            tracing::error!(
                attempt_id = %self.attempt.id,
                error = %e,
                "Failed to remove credentials directory"
            );
        }
    }
}

/// How the open settle delay ended.
enum Settle {
    Elapsed,
    Closed(Option<DisconnectReason>),
    Superseded,
}

fn describe(reason: Option<DisconnectReason>) -> String {
    reason.map_or_else(|| "none".to_string(), |r| r.to_string())
}
