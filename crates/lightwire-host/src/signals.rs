//! Cancellation for the pipeline.
//!
//! A [`ShutdownHandle`] is shared by every stage task. Triggering it (from a
//! signal, a fatal stage error or the controller handle) makes each stage
//! leave its loop and drop what it owns.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why the pipeline stopped without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The transport reached end of stream.
    TransportClosed,
    /// Shutdown was requested.
    Shutdown,
}

/// A handle for triggering or checking shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownHandle {
    /// Creates a handle in the running state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Triggers a shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }

    /// Returns true if shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns a future that completes when shutdown is triggered.
    pub fn wait(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.rx.clone(),
        }
    }

    /// Triggers shutdown on SIGINT or SIGTERM (Ctrl+C elsewhere).
    #[cfg(unix)]
    pub fn spawn_signal_listener(&self) {
        let handle = self.clone();

        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(term), Ok(int)) => (term, int),
                    (Err(e), _) | (_, Err(e)) => {
                        warn!(error = %e, "Failed to install signal handlers, using Ctrl+C");
                        if tokio::signal::ctrl_c().await.is_ok() {
                            info!("Received Ctrl+C, shutting down");
                            handle.trigger();
                        }
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = sigint.recv() => info!("Received SIGINT, shutting down"),
                _ = handle.wait().wait() => {
                    debug!("Signal listener stopped");
                    return;
                }
            }
            handle.trigger();
        });
    }

    /// Triggers shutdown on Ctrl+C.
    #[cfg(not(unix))]
    pub fn spawn_signal_listener(&self) {
        let handle = self.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        info!("Received Ctrl+C, shutting down");
                        handle.trigger();
                    }
                }
                _ = handle.wait().wait() => debug!("Signal listener stopped"),
            }
        });
    }
}

/// A future-producing signal that completes once shutdown is triggered.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Waits for the shutdown signal.
    ///
    /// Also returns if every handle has been dropped.
    pub async fn wait(mut self) {
        // wait_for checks the current value first.
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}
