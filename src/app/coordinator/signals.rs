//! Signal handling for graceful shutdown
//!
//! Translates CTRL-C and SIGTERM into cancellation of the running fetch.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels a token when the process is asked to stop
pub struct SignalHandler {
    cancel: CancellationToken,
}

impl SignalHandler {
    /// Create a new signal handler cancelling the given token
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Setup signal handling for graceful shutdown (CTRL-C, SIGTERM)
    ///
    /// Returns a handle to the background task that monitors for signals.
    /// The task ends once a signal arrives or the token is cancelled elsewhere.
    pub fn setup(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received Ctrl+C, cancelling fetch");
                },
                _ = terminate => {
                    info!("Received terminate signal, cancelling fetch");
                },
                _ = cancel.cancelled() => return,
            }

            cancel.cancel();
        })
    }
}
