//! Protocol connection seam.
//!
//! The messaging protocol lives outside this crate. A [`ConnectionFactory`]
//! builds a [`Connection`] from stored credentials and hands back the stream
//! of lifecycle events it emits. [`bridge`] implements both traits over a
//! WebSocket to an external protocol process.

pub mod bridge;
mod reason;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::BrowserIdentity;
use crate::credentials::CredentialState;
use crate::error::ConnectionError;

pub use bridge::BridgeConnectionFactory;
pub use reason::{DisconnectReason, is_transient};

/// Lifecycle events emitted by a connection, in the order they occurred.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection is authenticated and usable. `own_id` is the account's address.
    Open { own_id: String },
    /// The connection closed. `None` when the protocol gave no status code.
    Close { reason: Option<DisconnectReason> },
    /// Key material changed and must be persisted.
    CredentialsUpdated(CredentialState),
}

/// Receiving side of a connection's event channel.
pub type EventStream = mpsc::UnboundedReceiver<ConnectionEvent>;

/// Options passed to the protocol when creating a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub browser: BrowserIdentity,
    pub mark_online_on_connect: bool,
    pub print_qr_in_terminal: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            browser: BrowserIdentity::default(),
            mark_online_on_connect: true,
            print_qr_in_terminal: false,
        }
    }
}

/// Outgoing message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    Text { text: String },
    Image { url: String, caption: String },
}

/// Handle to a message the connection accepted for delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub remote_jid: String,
}

/// Per-send options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Message to quote in the reply.
    pub quoted: Option<SentMessage>,
}

/// One live protocol connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Ask the protocol for a pairing code bound to `phone_number` (digits only).
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ConnectionError>;

    async fn send_message(
        &self,
        to: &str,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<SentMessage, ConnectionError>;

    /// Close the connection. Idempotent.
    async fn end(&self);
}

/// Creates connections bound to a credential state.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    async fn create(
        &self,
        state: &CredentialState,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Connection>, EventStream), ConnectionError>;
}
