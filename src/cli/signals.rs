//! Signal handling for graceful shutdown

use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

/// Cancellation token for async operations
#[derive(Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Wait until cancelled
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow() {
            if receiver.changed().await.is_err() {
                // Sender gone: cancellation can no longer happen
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancel `token` on SIGINT or SIGTERM (Ctrl+C elsewhere)
pub async fn setup_signal_handlers(token: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigint, mut sigterm) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigint.recv() => {
                eprintln!("\nReceived SIGINT, cancelling run...");
            }
            _ = sigterm.recv() => {
                eprintln!("\nReceived SIGTERM, cancelling run...");
            }
        }

        token.cancel();
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            return;
        }
        eprintln!("\nReceived Ctrl+C, cancelling run...");
        token.cancel();
    }
}

/// Run `future` unless `token` is cancelled first
pub async fn with_cancellation<F, T>(token: &CancellationToken, future: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        biased;
        result = future => Some(result),
        _ = token.cancelled() => None,
    }
}
