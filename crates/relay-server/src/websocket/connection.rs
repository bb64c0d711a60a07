//! Write half of a relayed connection.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Server going away (shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Policy violation (authentication failure).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// A frame queued for the connection's writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("connection is closed")]
    Closed,
    #[error("send queue is full")]
    Full,
}

/// Handle through which anyone (the connection's own session, the registry,
/// other sessions forwarding to it) writes to one socket.
///
/// Writes go through a bounded queue drained by the socket's writer task, so
/// a slow peer only ever stalls the task that is writing to it.
#[derive(Clone, Debug)]
pub struct PeerLink {
    tx: mpsc::Sender<Outbound>,
    closed: CancellationToken,
}

impl PeerLink {
    /// Create a link and the receiver its writer task drains.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let link = Self {
            tx,
            closed: CancellationToken::new(),
        };
        (link, rx)
    }

    /// Queue a text frame, waiting while the queue is full.
    pub async fn send(&self, text: String) -> Result<(), LinkError> {
        if self.closed.is_cancelled() {
            return Err(LinkError::Closed);
        }
        self.tx
            .send(Outbound::Text(text))
            .await
            .map_err(|_| LinkError::Closed)
    }

    /// Ask the connection to close. The close frame is queued behind any
    /// pending writes and the session loop is signalled to stop reading.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), LinkError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        let queued = self
            .tx
            .try_send(Outbound::Close {
                code,
                reason: reason.into(),
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => LinkError::Full,
                mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
            });
        self.closed.cancel();
        queued
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }
}
