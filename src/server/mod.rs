//! The HTTP server hosting the pairing routes.

pub mod routes;

use std::net::SocketAddr;

use axum::Router;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ServerError;

pub use routes::{AppState, router};

/// Binds the listener, spawns the server task and shuts it down gracefully.
pub struct PairingServer {
    addr: SocketAddr,
    app: Option<Router>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PairingServer {
    pub fn new(addr: SocketAddr, app: Router) -> Self {
        Self {
            addr,
            app: Some(app),
            local_addr: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind and spawn. Returns the bound address (useful with port 0).
    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        let app = self.app.take().ok_or_else(|| ServerError::Serve("already started".to_string()))?;

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| ServerError::BindFailed {
                addr: self.addr.to_string(),
                reason: e.to_string(),
            })?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::BindFailed {
            addr: self.addr.to_string(),
            reason: e.to_string(),
        })?;

        tracing::info!("Pairing server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    tracing::info!("Pairing server shutting down");
                })
                .await
            {
                tracing::error!("Pairing server error: {}", e);
            }
        });

        self.handle = Some(handle);
        Ok(local_addr)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Signal graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
