//! Graceful shutdown via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the token every session and the HTTP listener watch.
///
/// Cancelling it closes all relayed sockets with 1001 and stops accepting
/// new connections.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a coordinator whose token has not fired yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the token sessions select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Fire the token. Idempotent.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel, then wait up to `timeout` for `handle` to finish before
    /// aborting it.
    pub async fn graceful_shutdown(&self, handle: JoinHandle<()>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        info!(timeout_secs = timeout.as_secs(), "draining connections");

        let abort = handle.abort_handle();
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!("server stopped"),
            Ok(Err(e)) => warn!(error = %e, "server task ended abnormally"),
            Err(_) => {
                warn!("shutdown timed out after {timeout:?}, aborting server task");
                abort.abort();
            }
        }
    }
}
