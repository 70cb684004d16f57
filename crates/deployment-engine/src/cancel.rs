//! Cooperative cancellation for workflow runs.

use std::sync::Arc;
use tokio::sync::watch;

/// Cooperative cancellation token.
///
/// Cancellation surfaces as the distinct [`Error::Interrupted`] error: it is
/// never retried, and Sequence execution abandons unstarted work while
/// already-spawned Parallel branches are still awaited.
///
/// [`Error::Interrupted`]: crate::Error::Interrupted
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Trip the token; every clone observes the cancellation
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether the token has been tripped
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the token is tripped
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives inside every clone of the token, so this only
        // errors when cancellation can no longer happen; pend in that case.
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
