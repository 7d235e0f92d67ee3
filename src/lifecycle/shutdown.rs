//! Shutdown coordination.

use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to,
/// and keeps their join handles so shutdown can wait for them to finish.
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    /// Background tasks awaited by [`Shutdown::drain`].
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Get the number of active subscribers (tasks still listening).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Register a background task to await on drain.
    pub fn track(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(handle);
    }

    /// Trigger shutdown and wait for tracked tasks, aborting stragglers after `timeout`.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.trigger();
        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|p| p.into_inner()));
        let count = handles.len();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let joined = tokio::time::timeout(timeout, async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    tracing::warn!(error = %e, "Background task ended abnormally");
                }
            }
        })
        .await;

        match joined {
            Ok(()) => {
                tracing::info!(tasks = count, "Background tasks drained");
                true
            }
            Err(_) => {
                tracing::warn!(tasks = count, timeout = ?timeout, "Drain timed out, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
                false
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
