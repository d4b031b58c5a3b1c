//! Pairing attempts and reconnects.
//!
//! Every attempt gets its own credentials directory, a connection built from
//! the state loaded there, and a [`SessionRunner`] that handles the
//! connection's events. Fresh attempts and reconnects both pass through the
//! [`RequestGate`], so at most one setup runs at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::code::{PairingCode, normalize_phone_number};
use super::exporter::SessionExporter;
use super::gate::RequestGate;
use super::lifecycle::SessionRunner;
use super::session::{ActiveSession, SessionManager};
use crate::config::{Config, Delays, ExportConfig};
use crate::connection::{ConnectOptions, Connection, ConnectionFactory, EventStream};
use crate::credentials::{
    CredentialState, CredentialStore, CredentialsDir, DirectoryLease, SessionCredentials,
};
use crate::error::PairingError;
use crate::storage::BlobUploader;

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct PairingServices {
    pub credentials: Arc<dyn CredentialStore>,
    pub connections: Arc<dyn ConnectionFactory>,
    pub uploader: Arc<dyn BlobUploader>,
}

/// Backoff applied when a reconnect cannot set up a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Total setup tries, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `retry` (0-based): base * 2^retry, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub session_root: PathBuf,
    pub options: ConnectOptions,
    pub delays: Delays,
    pub export: ExportConfig,
    pub reconnect: ReconnectPolicy,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            session_root: config.session_root.clone(),
            options: ConnectOptions {
                browser: config.browser.clone(),
                ..ConnectOptions::default()
            },
            delays: config.delays,
            export: config.export.clone(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// What a successful pairing request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Code(PairingCode),
    /// The loaded credentials were already registered; no code was requested.
    AlreadyRegistered,
}

/// One pairing attempt. Reconnects reuse the same attempt.
#[derive(Debug, Clone)]
pub(crate) struct Attempt {
    pub(crate) id: Uuid,
    /// Digits only.
    pub(crate) phone_number: String,
    pub(crate) dir: CredentialsDir,
}

impl Attempt {
    fn new(session_root: &Path, phone_number: String) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            phone_number,
            dir: CredentialsDir::for_attempt(session_root, id),
        }
    }
}

enum ReconnectStep {
    Launched,
    Superseded,
}

struct Bootstrapped {
    credentials: SessionCredentials,
    state: CredentialState,
    connection: Arc<dyn Connection>,
    events: EventStream,
}

struct Inner {
    credentials: Arc<dyn CredentialStore>,
    connections: Arc<dyn ConnectionFactory>,
    exporter: Arc<SessionExporter>,
    session_root: PathBuf,
    options: ConnectOptions,
    delays: Delays,
    reconnect: ReconnectPolicy,
    gate: RequestGate,
    sessions: SessionManager,
}

/// Runs pairing attempts. Cheap to clone.
#[derive(Clone)]
pub struct PairingCoordinator {
    inner: Arc<Inner>,
}

impl PairingCoordinator {
    pub fn new(services: PairingServices, settings: CoordinatorSettings) -> Self {
        let exporter = SessionExporter::new(services.uploader, settings.export);
        Self {
            inner: Arc::new(Inner {
                credentials: services.credentials,
                connections: services.connections,
                exporter: Arc::new(exporter),
                session_root: settings.session_root,
                options: settings.options,
                delays: settings.delays,
                reconnect: settings.reconnect,
                gate: RequestGate::new(),
                sessions: SessionManager::new(),
            }),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    pub fn gate(&self) -> &RequestGate {
        &self.inner.gate
    }

    pub fn delays(&self) -> Delays {
        self.inner.delays
    }

    pub fn exporter(&self) -> Arc<SessionExporter> {
        Arc::clone(&self.inner.exporter)
    }

    /// Start a pairing attempt for `phone_number` and return its code.
    ///
    /// Waits for any setup already in progress. The returned code is produced
    /// only by this call; later reconnects of the same attempt never answer a
    /// caller.
    pub async fn pair(&self, phone_number: &str) -> Result<PairingOutcome, PairingError> {
        let phone_number = normalize_phone_number(phone_number);
        self.inner.gate.run(self.start_attempt(phone_number)).await
    }

    async fn start_attempt(&self, phone_number: String) -> Result<PairingOutcome, PairingError> {
        let attempt = Attempt::new(&self.inner.session_root, phone_number);
        tracing::info!(attempt_id = %attempt.id, "Starting pairing attempt");
        let mut guard = AttemptGuard::new(&attempt);

        let boot = match self.bootstrap(&attempt).await {
            Ok(boot) => boot,
            Err(e) => {
                tracing::error!(attempt_id = %attempt.id, error = %e, "Pairing setup failed");
                guard.abandon().await;
                return Err(e);
            }
        };

        let registered = boot.state.registered;
        let connection = Arc::clone(&boot.connection);
        let installed = self.launch(attempt.clone(), boot);
        guard.launched(self.inner.sessions.clone(), installed);
        guard.wait_installed().await;

        if registered {
            tracing::info!(attempt_id = %attempt.id, "Credentials already registered");
            guard.finish();
            return Ok(PairingOutcome::AlreadyRegistered);
        }

        match self.request_code(connection.as_ref(), &attempt.phone_number).await {
            Ok(code) => {
                tracing::info!(attempt_id = %attempt.id, "Pairing code issued");
                guard.finish();
                Ok(PairingOutcome::Code(code))
            }
            Err(e) => {
                tracing::error!(attempt_id = %attempt.id, error = %e, "Pairing code request failed");
                guard.abandon().await;
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, attempt: &Attempt) -> Result<Bootstrapped, PairingError> {
        let (credentials, state) =
            SessionCredentials::open(Arc::clone(&self.inner.credentials), attempt.dir.clone())
                .await?;
        let (connection, events) = self
            .inner
            .connections
            .create(&state, &self.inner.options)
            .await?;
        Ok(Bootstrapped {
            credentials,
            state,
            connection,
            events,
        })
    }

    /// Spawn a task that installs the session and then runs it.
    ///
    /// The returned receiver resolves once the session is installed.
    fn launch(&self, attempt: Attempt, boot: Bootstrapped) -> oneshot::Receiver<()> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (installed_tx, installed_rx) = oneshot::channel();
        let session = ActiveSession::new(
            attempt.id,
            attempt.dir.clone(),
            boot.state.registered,
            Arc::clone(&boot.connection),
            shutdown_tx,
        );
        let runner = SessionRunner::new(
            self.clone(),
            attempt,
            boot.credentials,
            boot.connection,
            boot.events,
            shutdown_rx,
        );
        let sessions = self.inner.sessions.clone();
        tokio::spawn(async move {
            sessions.install(session).await;
            let _ = installed_tx.send(());
            runner.run().await;
        });
        installed_rx
    }

    async fn request_code(
        &self,
        connection: &dyn Connection,
        phone_number: &str,
    ) -> Result<PairingCode, PairingError> {
        tokio::time::sleep(self.inner.delays.pairing_settle).await;
        let raw = connection.request_pairing_code(phone_number).await?;
        let code = PairingCode::from_raw(&raw);
        if code.as_str().is_empty() {
            return Err(PairingError::EmptyCode);
        }
        Ok(code)
    }

    /// Reconnect `attempt` with its existing directory.
    ///
    /// Boxed so the runner can spawn it without an infinitely sized future.
    pub(crate) fn reconnect(&self, attempt: Attempt) -> BoxFuture<'static, ()> {
        let coordinator = self.clone();
        async move { coordinator.run_reconnect(attempt).await }.boxed()
    }

    async fn run_reconnect(&self, attempt: Attempt) {
        let policy = self.inner.reconnect;
        let mut last_error = None;

        for try_number in 0..policy.max_attempts.max(1) {
            if try_number > 0 {
                let delay = policy.delay_for(try_number - 1);
                tracing::debug!(
                    attempt_id = %attempt.id,
                    delay_ms = delay.as_millis() as u64,
                    "Waiting before reconnect retry"
                );
                tokio::time::sleep(delay).await;
            }

            match self.inner.gate.run(self.reconnect_once(&attempt)).await {
                Ok(ReconnectStep::Launched) | Ok(ReconnectStep::Superseded) => return,
                Err(e) => {
                    tracing::warn!(
                        attempt_id = %attempt.id,
                        try_number = try_number + 1,
                        error = %e,
                        "Reconnect failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        tracing::error!(
            attempt_id = %attempt.id,
            error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
            "Giving up on reconnect"
        );
        if let Some(session) = self.inner.sessions.clear(attempt.id).await {
            session.retire(false).await;
        }
        if let Err(e) = attempt.dir.remove().await {
            tracing::warn!(attempt_id = %attempt.id, error = %e, "Failed to remove credentials directory");
        }
    }

    async fn reconnect_once(&self, attempt: &Attempt) -> Result<ReconnectStep, PairingError> {
        if !self.inner.sessions.is_active(attempt.id).await {
            tracing::info!(attempt_id = %attempt.id, "Session superseded, dropping reconnect");
            if let Err(e) = attempt.dir.remove().await {
                tracing::warn!(attempt_id = %attempt.id, error = %e, "Failed to remove credentials directory");
            }
            return Ok(ReconnectStep::Superseded);
        }

        let boot = self.bootstrap(attempt).await?;
        let registered = boot.state.registered;
        let _ = self.launch(attempt.clone(), boot).await;
        if registered {
            tracing::info!(attempt_id = %attempt.id, "Reconnected");
        } else {
            tracing::info!(
                attempt_id = %attempt.id,
                "Reconnected before registration; waiting for the pairing to complete"
            );
        }
        Ok(ReconnectStep::Launched)
    }
}

/// Undoes a fresh attempt whose setup did not finish.
///
/// Until the session is launched, dropping the guard removes the attempt's
/// directory. Afterwards it retires the session instead, whose runner ends
/// the connection and removes the directory. [`AttemptGuard::finish`] keeps
/// everything in place.
struct AttemptGuard {
    attempt_id: Uuid,
    lease: Option<DirectoryLease>,
    launched: Option<LaunchedAttempt>,
}

struct LaunchedAttempt {
    sessions: SessionManager,
    installed: Option<oneshot::Receiver<()>>,
}

impl LaunchedAttempt {
    async fn retire(self, attempt_id: Uuid) {
        if let Some(installed) = self.installed {
            let _ = installed.await;
        }
        if let Some(session) = self.sessions.clear(attempt_id).await {
            session.retire(false).await;
        }
    }
}

impl AttemptGuard {
    fn new(attempt: &Attempt) -> Self {
        Self {
            attempt_id: attempt.id,
            lease: Some(attempt.dir.lease()),
            launched: None,
        }
    }

    /// Hand the directory over to the launched session.
    fn launched(&mut self, sessions: SessionManager, installed: oneshot::Receiver<()>) {
        if let Some(lease) = self.lease.take() {
            lease.disarm();
        }
        self.launched = Some(LaunchedAttempt {
            sessions,
            installed: Some(installed),
        });
    }

    /// Wait until the launched session is the active one.
    async fn wait_installed(&mut self) {
        let Some(launched) = self.launched.as_mut() else {
            return;
        };
        if let Some(installed) = launched.installed.as_mut() {
            let _ = installed.await;
        }
        launched.installed = None;
    }

    fn finish(mut self) {
        if let Some(lease) = self.lease.take() {
            lease.disarm();
        }
        self.launched = None;
    }

    /// Clean up now, reporting failures.
    async fn abandon(mut self) {
        if let Some(lease) = self.lease.take() {
            if let Err(e) = lease.release().await {
                tracing::warn!(attempt_id = %self.attempt_id, error = %e, "Failed to remove credentials directory");
            }
        }
        if let Some(launched) = self.launched.take() {
            launched.retire(self.attempt_id).await;
        }
    }
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        let Some(launched) = self.launched.take() else {
            return;
        };
        tracing::info!(attempt_id = %self.attempt_id, "Pairing request dropped; retiring its session");
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(launched.retire(self.attempt_id));
            }
            Err(_) => {
                tracing::warn!(attempt_id = %self.attempt_id, "No runtime to retire the dropped session");
            }
        }
    }
}
