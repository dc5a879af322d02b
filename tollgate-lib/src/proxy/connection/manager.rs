use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use super::guards::ConnectionGuard;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Server is shutting down")]
    Shutdown,
}

/// Counts live connections so shutdown can wait for them to drain
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    shutting_down: AtomicBool,
    closed_tx: watch::Sender<usize>,
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (closed_tx, _) = watch::channel(0);
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            shutting_down: AtomicBool::new(false),
            closed_tx,
        }
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting; connections already admitted keep running
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Register a new connection, unless shutdown has begun
    pub fn try_accept(&self) -> Result<ConnectionGuard, ConnectionError> {
        if self.is_shutdown() {
            return Err(ConnectionError::Shutdown);
        }
        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(ConnectionGuard::new(Arc::clone(&self.active), self.closed_tx.clone()))
    }

    /// Wait until no connection is active or `grace` elapses.
    /// Returns the number of connections still open.
    pub async fn wait_idle(&self, grace: Duration) -> usize {
        let mut rx = self.closed_tx.subscribe();
        let drained = tokio::time::timeout(grace, async {
            while self.active() > 0 {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        match drained {
            Ok(()) => 0,
            Err(_) => self.active(),
        }
    }
}
