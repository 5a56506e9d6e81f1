use tokio_util::sync::CancellationToken;

use crate::logger::Logger;

/// Process-wide, fire-and-forget shutdown signal.
///
/// Every loop holds a clone and checks it at its decision points. Raising it
/// is idempotent and has no acknowledgement.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal for every holder at once.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has been raised.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// A token that fires with this signal but can also be cancelled on its
    /// own. Connections use one to end both of their loops.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

/// This function spawns a background task that:
/// - Listens for a Ctrl+C signal (SIGINT)
/// - Logs the shutdown event
/// - Raises the shutdown signal for every other task
pub fn spawn_shutdown_listener(
    shutdown: Shutdown,
    logger: Logger,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    logger.error(&format!("Failed to listen for ctrl_c: {}", e));
                    return;
                }
                logger.warn("🛑 Ctrl+C received — shutting down.");
                shutdown.trigger();
            }
            // Shut down by someone else; nothing left to listen for
            _ = shutdown.wait() => {}
        }
    })
}
