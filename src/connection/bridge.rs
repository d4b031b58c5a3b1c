//! WebSocket client for an external protocol bridge.
//!
//! The bridge process speaks the messaging protocol; this client drives it
//! with JSON frames. Requests carry an `id` and are answered by a
//! `{"type":"response","id":..}` frame. Lifecycle events arrive unsolicited
//! as `{"type":"event","event":..}` frames and are forwarded to the
//! connection's [`EventStream`] in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{
    ConnectOptions, Connection, ConnectionEvent, ConnectionFactory, DisconnectReason, EventStream,
    MessageContent, SendOptions, SentMessage,
};
use crate::credentials::CredentialState;
use crate::error::ConnectionError;

/// How long a request waits for its response frame.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Outgoing frame buffer size.
const OUTGOING_BUFFER: usize = 64;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>>;

/// Connects to the bridge at a WebSocket URL.
#[derive(Debug, Clone)]
pub struct BridgeConnectionFactory {
    url: String,
    request_timeout: Duration,
}

impl BridgeConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl ConnectionFactory for BridgeConnectionFactory {
    async fn create(
        &self,
        state: &CredentialState,
        options: &ConnectOptions,
    ) -> Result<(Arc<dyn Connection>, EventStream), ConnectionError> {
        let (ws_stream, _) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| ConnectionError::ConnectFailed {
                    url: self.url.clone(),
                    reason: e.to_string(),
                })?;
        let (mut write, mut read) = ws_stream.split();

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(OUTGOING_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let ended = Arc::new(AtomicBool::new(false));

        tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let is_close = matches!(msg, Message::Close(_));
                if write.send(msg).await.is_err() || is_close {
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_ended = ended.clone();
        let reader_outgoing = outgoing_tx.clone();
        tokio::spawn(async move {
            let mut saw_close = false;
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match decode_frame(text.as_str()) {
                        Ok(Frame::Response { id, outcome }) => {
                            if let Some(tx) = reader_pending.lock().await.remove(&id) {
                                let _ = tx.send(outcome);
                            } else {
                                tracing::debug!(id, "Response for unknown bridge request");
                            }
                        }
                        Ok(Frame::Event(event)) => {
                            saw_close |= matches!(event, ConnectionEvent::Close { .. });
                            let _ = event_tx.send(event);
                        }
                        Err(e) => tracing::warn!(error = %e, "Dropping malformed bridge frame"),
                    },
                    Ok(Message::Ping(data)) => {
                        let _ = reader_outgoing.send(Message::Pong(data)).await;
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Bridge socket error");
                        break;
                    }
                }
            }

            // Fail any waiters; their senders drop here.
            reader_pending.lock().await.clear();
            if !saw_close && !reader_ended.load(Ordering::SeqCst) {
                let _ = event_tx.send(ConnectionEvent::Close {
                    reason: Some(DisconnectReason::ConnectionClosed),
                });
            }
        });

        let connection = BridgeConnection {
            outgoing: outgoing_tx,
            pending,
            next_id: AtomicU64::new(1),
            ended,
            request_timeout: self.request_timeout,
        };

        let connected = connection
            .request(
                "connect",
                json!({
                    "credentials": state,
                    "options": {
                        "browser": [options.browser.platform, options.browser.browser],
                        "mark_online_on_connect": options.mark_online_on_connect,
                        "print_qr_in_terminal": options.print_qr_in_terminal,
                    },
                }),
            )
            .await;
        if let Err(e) = connected {
            connection.end().await;
            return Err(e);
        }

        tracing::debug!(url = %self.url, "Bridge connection created");
        Ok((Arc::new(connection), event_rx))
    }
}

/// A connection multiplexed over one bridge socket.
pub struct BridgeConnection {
    outgoing: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    ended: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl BridgeConnection {
    async fn request(&self, op: &str, mut body: Value) -> Result<Value, ConnectionError> {
        if self.ended.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), json!(id));
            map.insert("op".to_string(), json!(op));
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self
            .outgoing
            .send(Message::Text(body.to_string().into()))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(ConnectionError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(reason))) => Err(ConnectionError::RequestFailed {
                op: op.to_string(),
                reason,
            }),
            Ok(Err(_)) => Err(ConnectionError::NoResponse { op: op.to_string() }),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(ConnectionError::NoResponse { op: op.to_string() })
            }
        }
    }
}

#[async_trait]
impl Connection for BridgeConnection {
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, ConnectionError> {
        let result = self
            .request("request_pairing_code", json!({ "phone_number": phone_number }))
            .await?;
        result
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ConnectionError::InvalidFrame("pairing code missing".to_string()))
    }

    async fn send_message(
        &self,
        to: &str,
        content: MessageContent,
        options: SendOptions,
    ) -> Result<SentMessage, ConnectionError> {
        let result = self
            .request(
                "send_message",
                json!({ "to": to, "content": content, "quoted": options.quoted }),
            )
            .await?;
        serde_json::from_value(result).map_err(|e| ConnectionError::InvalidFrame(e.to_string()))
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self
            .outgoing
            .send(Message::Text(json!({ "op": "end" }).to_string().into()))
            .await;
        let _ = self.outgoing.send(Message::Close(None)).await;
    }
}

enum Frame {
    Response {
        id: u64,
        outcome: Result<Value, String>,
    },
    Event(ConnectionEvent),
}

#[derive(Deserialize)]
struct ResponseFrame {
    id: u64,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventFrame {
    Open {
        user_id: String,
    },
    Close {
        #[serde(default)]
        status_code: Option<u16>,
    },
    CredentialsUpdated {
        credentials: CredentialState,
    },
}

fn decode_frame(text: &str) -> Result<Frame, ConnectionError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ConnectionError::InvalidFrame(e.to_string()))?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind.as_str() {
        "response" => {
            let frame: ResponseFrame = serde_json::from_value(value)
                .map_err(|e| ConnectionError::InvalidFrame(e.to_string()))?;
            let outcome = if frame.ok {
                Ok(frame.result)
            } else {
                Err(frame.error.unwrap_or_else(|| "unknown error".to_string()))
            };
            Ok(Frame::Response {
                id: frame.id,
                outcome,
            })
        }
        "event" => {
            let frame: EventFrame = serde_json::from_value(value)
                .map_err(|e| ConnectionError::InvalidFrame(e.to_string()))?;
            Ok(Frame::Event(match frame {
                EventFrame::Open { user_id } => ConnectionEvent::Open { own_id: user_id },
                EventFrame::Close { status_code } => ConnectionEvent::Close {
                    reason: status_code.map(DisconnectReason::from_status_code),
                },
                EventFrame::CredentialsUpdated { credentials } => {
                    ConnectionEvent::CredentialsUpdated(credentials)
                }
            }))
        }
        other => Err(ConnectionError::InvalidFrame(format!(
            "unknown frame type {other:?}"
        ))),
    }
}
