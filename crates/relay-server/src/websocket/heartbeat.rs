//! Peer liveness. The writer pings on every interval; any frame the peer
//! sends back, pongs included, marks it alive.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::connection::{PeerLink, CLOSE_GOING_AWAY};
use crate::metrics::HEARTBEAT_TIMEOUTS_TOTAL;

/// Whether the peer has been heard from since the last heartbeat check.
#[derive(Debug)]
pub struct Liveness {
    alive: AtomicBool,
}

impl Liveness {
    /// A freshly opened connection counts as alive.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
        }
    }

    /// Record a sign of life from the peer.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Read and reset the flag.
    fn take(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The peer stayed silent for the whole timeout window.
    TimedOut,
    /// The connection ended some other way first.
    Cancelled,
}

/// Check the peer once per `interval` until it has missed enough checks to
/// cover `timeout`, or until `cancel` fires.
///
/// The number of allowed misses is `timeout / interval` rounded up, and at
/// least one.
pub async fn run_heartbeat(
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let interval = interval.max(Duration::from_millis(1));
    let max_missed = timeout.as_millis().div_ceil(interval.as_millis()).max(1);
    let mut checks = time::interval_at(time::Instant::now() + interval, interval);
    let mut missed: u128 = 0;

    loop {
        tokio::select! {
            _ = checks.tick() => {
                if liveness.take() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

/// Close `link` once the peer goes silent. Closing the link ends the relay
/// loop, which unregisters the connection.
pub async fn close_when_silent(
    link: PeerLink,
    liveness: Arc<Liveness>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let result = run_heartbeat(liveness, interval, timeout, cancel).await;
    if result == HeartbeatResult::TimedOut {
        counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        warn!(timeout_secs = timeout.as_secs(), "peer stopped answering heartbeats, closing");
        // A full queue still cancels the link, which is what stops the loop.
        let _ = link.close(CLOSE_GOING_AWAY, "heartbeat timeout");
    }
    result
}
