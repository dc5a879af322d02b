use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Held by a connection task for its lifetime.
/// Decrements the active count on drop and wakes shutdown when it reaches zero.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<usize>,
}

impl ConnectionGuard {
    pub(crate) fn new(counter: Arc<AtomicUsize>, notifier: watch::Sender<usize>) -> Self {
        Self { counter, notifier }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.notifier.send_replace(remaining);
    }
}
