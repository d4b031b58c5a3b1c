//! Single-flight gate around the pairing entry point.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

/// Lets at most one guarded future run at a time.
///
/// Waiters are admitted in arrival order. The slot is released when the
/// guarded future completes, returns an error, or is dropped mid-flight.
#[derive(Debug, Clone, Default)]
pub struct RequestGate {
    slot: Arc<Mutex<()>>,
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the slot, then drive `fut` to completion while holding it.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _held = self.slot.lock().await;
        fut.await
    }

    /// Whether a guarded future is currently running.
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }
}
