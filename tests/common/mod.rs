//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

use pairlink::config::{Delays, ExportConfig};
use pairlink::connection::{
    ConnectOptions, Connection, ConnectionEvent, ConnectionFactory, DisconnectReason, EventStream,
    MessageContent, SendOptions, SentMessage,
};
use pairlink::credentials::{CredentialState, CredentialStore, FileCredentialStore};
use pairlink::error::{ConnectionError, CredentialError, UploadError};
use pairlink::pairing::{
    CoordinatorSettings, PairingCoordinator, PairingServices, ReconnectPolicy,
};
use pairlink::storage::BlobUploader;

pub const OWN_ID: &str = "15551234567@s.whatsapp.net";

/// A connection whose behavior is fixed at creation.
pub struct ScriptedConnection {
    code: Option<String>,
    code_delay: Duration,
    fail_sends: bool,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    pub code_requests: Mutex<Vec<String>>,
    pub sent: Mutex<Vec<(String, MessageContent, SendOptions)>>,
    pub ended: AtomicBool,
}

impl ScriptedConnection {
    pub fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    pub fn open(&self) {
        self.emit(ConnectionEvent::Open {
            own_id: OWN_ID.to_string(),
        });
    }

    pub fn close(&self, reason: DisconnectReason) {
        self.emit(ConnectionEvent::Close {
            reason: Some(reason),
        });
    }

    pub fn update_credentials(&self, registered: bool) {
        let mut state = CredentialState::fresh();
        state.registered = registered;
        state.me = Some(OWN_ID.to_string());
        state
            .payload
            .insert("noiseKey".to_string(), serde_json::json!("abc123"));
        self.emit(ConnectionEvent::CredentialsUpdated(state));
    }

    pub fn code_requests(&self) -> Vec<String> {
        self.code_requests.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<(String, MessageContent, SendOptions)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ConnectionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.code_requests
            .lock()
            .unwrap()
            .push(phone_number.to_string());
        tokio::time::sleep(self.code_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.code.clone().ok_or(ConnectionError::RequestFailed {
            op: "request_pairing_code".to_string(),
            reason: "rejected".to_string(),
        })
    }

    async fn send_message(
        &self,
        to: &str,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<SentMessage, ConnectionError> {
        if self.fail_sends {
            return Err(ConnectionError::Closed);
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), content, options));
        Ok(SentMessage {
            id: format!("msg-{}", sent.len()),
            remote_jid: to.to_string(),
        })
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`ScriptedConnection`]s and remembers each one.
pub struct ScriptedFactory {
    pub code: Option<String>,
    pub code_delay: Duration,
    pub fail_sends: bool,
    /// Number of leading `create` calls that fail.
    pub failing_creates: AtomicUsize,
    /// Fail every `create` after the first successful one.
    pub fail_after_first: bool,
    pub create_calls: AtomicUsize,
    pub connections: Mutex<Vec<Arc<ScriptedConnection>>>,
    pub options_seen: Mutex<Vec<ConnectOptions>>,
    in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn with_code(code: &str) -> Self {
        Self {
            code: Some(code.to_string()),
            code_delay: Duration::ZERO,
            fail_sends: false,
            failing_creates: AtomicUsize::new(0),
            fail_after_first: false,
            create_calls: AtomicUsize::new(0),
            connections: Mutex::new(Vec::new()),
            options_seen: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connection(&self, index: usize) -> Arc<ScriptedConnection> {
        Arc::clone(&self.connections.lock().unwrap()[index])
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl ConnectionFactory for ScriptedFactory {
    async fn create(
        &self,
        _state: &CredentialState,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Connection>, EventStream), ConnectionError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let leading_failure = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if leading_failure || (self.fail_after_first && self.connection_count() > 0) {
            return Err(ConnectionError::ConnectFailed {
                url: "scripted://bridge".to_string(),
                reason: "refused".to_string(),
            });
        }

        self.options_seen.lock().unwrap().push(options.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(ScriptedConnection {
            code: self.code.clone(),
            code_delay: self.code_delay,
            fail_sends: self.fail_sends,
            events: tx,
            in_flight: Arc::clone(&self.in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
            code_requests: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            ended: AtomicBool::new(false),
        });
        self.connections.lock().unwrap().push(Arc::clone(&connection));
        Ok((connection, rx))
    }
}

/// Returns a fixed URL, recording the contents of every uploaded file.
pub struct ScriptedUploader {
    url: Option<String>,
    /// How long each upload takes after its file has been read.
    delay: Duration,
    pub uploads: Mutex<Vec<(PathBuf, Option<String>)>>,
}

impl ScriptedUploader {
    pub fn returning(url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            delay: Duration::ZERO,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            url: None,
            delay: Duration::ZERO,
            uploads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn uploads(&self) -> Vec<(PathBuf, Option<String>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl BlobUploader for ScriptedUploader {
    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let contents = std::fs::read_to_string(path).ok();
        self.uploads
            .lock()
            .unwrap()
            .push((path.to_path_buf(), contents));
        tokio::time::sleep(self.delay).await;
        self.url
            .clone()
            .ok_or_else(|| UploadError::RequestFailed("storage offline".to_string()))
    }
}

/// File store that reports every loaded state as registered.
pub struct RegisteredStore(pub FileCredentialStore);

#[async_trait]
impl CredentialStore for RegisteredStore {
    async fn load(&self, dir: &Path) -> Result<CredentialState, CredentialError> {
        let mut state = self.0.load(dir).await?;
        state.registered = true;
        Ok(state)
    }

    async fn save(&self, dir: &Path, state: &CredentialState) -> Result<(), CredentialError> {
        self.0.save(dir, state).await
    }
}

/// File store whose loads take `delay`.
pub struct SlowStore {
    inner: FileCredentialStore,
    delay: Duration,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: FileCredentialStore::new(),
            delay,
        }
    }
}

#[async_trait]
impl CredentialStore for SlowStore {
    async fn load(&self, dir: &Path) -> Result<CredentialState, CredentialError> {
        tokio::time::sleep(self.delay).await;
        self.inner.load(dir).await
    }

    async fn save(&self, dir: &Path, state: &CredentialState) -> Result<(), CredentialError> {
        self.inner.save(dir, state).await
    }
}

pub struct Harness {
    pub root: TempDir,
    pub factory: Arc<ScriptedFactory>,
    pub uploader: Arc<ScriptedUploader>,
    pub coordinator: PairingCoordinator,
}

pub struct HarnessBuilder {
    factory: ScriptedFactory,
    uploader: ScriptedUploader,
    store: Arc<dyn CredentialStore>,
    delays: Delays,
    reconnect: ReconnectPolicy,
}

impl HarnessBuilder {
    pub fn new(factory: ScriptedFactory) -> Self {
        Self {
            factory,
            uploader: ScriptedUploader::returning("https://mega.nz/file/abc#key"),
            store: Arc::new(FileCredentialStore::new()),
            delays: Delays::none(),
            reconnect: ReconnectPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
            },
        }
    }

    pub fn uploader(mut self, uploader: ScriptedUploader) -> Self {
        self.uploader = uploader;
        self
    }

    pub fn store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    pub fn delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn build(self) -> Harness {
        let root = TempDir::new().unwrap();
        let factory = Arc::new(self.factory);
        let uploader = Arc::new(self.uploader);
        let services = PairingServices {
            credentials: self.store,
            connections: factory.clone(),
            uploader: uploader.clone(),
        };
        let settings = CoordinatorSettings {
            session_root: root.path().to_path_buf(),
            options: ConnectOptions::default(),
            delays: self.delays,
            export: ExportConfig::default(),
            reconnect: self.reconnect,
        };
        Harness {
            root,
            factory,
            uploader,
            coordinator: PairingCoordinator::new(services, settings),
        }
    }
}

impl Harness {
    /// Attempt directories currently present under the session root.
    pub fn attempt_dirs(&self) -> Vec<PathBuf> {
        std::fs::read_dir(self.root.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

/// Poll `check` until it holds, panicking after a few seconds.
pub async fn eventually<F>(what: &str, check: F)
where
    F: Fn() -> bool,
{
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}

/// Like [`eventually`] for checks that need to await.
pub async fn eventually_async<F, Fut>(what: &str, check: F)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {}", what);
}
