//! Axum WebSocket glue: authentication, the writer task and inbound frames.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, Stream, StreamExt};
use metrics::counter;
use relay_core::{ErrorObject, Response};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info, instrument, warn, Span};

use super::connection::{Outbound, PeerLink, CLOSE_POLICY_VIOLATION};
use super::heartbeat::{close_when_silent, Liveness};
use super::relay::{PeerKind, RelaySession};
use crate::auth::ConnectParams;
use crate::metrics::AUTH_FAILURES_TOTAL;
use crate::server::AppState;

/// How long the writer gets to flush queued frames after the loop ends.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

type InboundFrames = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Serve one upgraded socket from authentication to cleanup.
///
/// 1. Authenticates; a rejected socket gets a -32004 envelope and close 1008
/// 2. Registers the connection and spawns its writer task
/// 3. Runs the relay loop until the peer leaves, the registry closes the
///    link, the peer misses its heartbeats, or the server shuts down
/// 4. Gives the writer a moment to flush, then stops it
#[instrument(skip_all, fields(kind = kind.as_str(), connection_id = field::Empty))]
pub async fn run_ws_session(ws: WebSocket, kind: PeerKind, params: ConnectParams, state: AppState) {
    let (mut ws_tx, ws_rx) = ws.split();

    let agent_id = match state.authenticator.authenticate(&params) {
        Ok(agent_id) => agent_id,
        Err(e) => {
            counter!(AUTH_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
            warn!(error = %e, "rejecting unauthenticated connection");
            let rejection = Response::error(None, ErrorObject::authentication(e.to_string()));
            if let Ok(text) = rejection.encode() {
                let _ = ws_tx.send(Message::Text(text.into())).await;
            }
            let close = CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: e.to_string().into(),
            };
            let _ = ws_tx.send(Message::Close(Some(close))).await;
            return;
        }
    };

    let (link, outbound) = PeerLink::new(state.session.send_queue_capacity);
    let session = RelaySession::open(
        kind,
        agent_id,
        link.clone(),
        state.registry.clone(),
        state.interpreter.clone(),
    );
    let connection_id = session.connection_id();
    Span::current().record("connection_id", field::display(connection_id));

    let mut writer = tokio::spawn(write_loop(ws_tx, outbound, state.session.heartbeat_interval()));

    let liveness = Arc::new(Liveness::new());
    let watch_cancel = CancellationToken::new();
    let watch = tokio::spawn(close_when_silent(
        link,
        liveness.clone(),
        state.session.heartbeat_interval(),
        state.session.heartbeat_timeout(),
        watch_cancel.clone(),
    ));

    let read_timeout = match kind {
        PeerKind::Protocol => state.session.read_timeout(),
        PeerKind::Tool | PeerKind::Robot => None,
    };
    session
        .run(inbound_frames(ws_rx, liveness), read_timeout, state.shutdown.token())
        .await;

    watch_cancel.cancel();
    let _ = watch.await;

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
        debug!(connection_id = %connection_id, "writer did not drain in time");
        writer.abort();
    }
    info!(connection_id = %connection_id, "session finished");
}

/// Drain the link's queue into the socket and ping on every heartbeat.
/// Ends after a close frame, a failed write, or once every link handle is
/// gone.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    heartbeat: Duration,
) {
    let start = tokio::time::Instant::now() + heartbeat;
    let mut ping = tokio::time::interval_at(start, heartbeat);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outbound::Close { code, reason }) => {
                    let frame = CloseFrame { code, reason: reason.into() };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

/// Text payloads of the socket's data frames. Binary frames count when they
/// hold UTF-8. Every frame received, control frames included, marks the peer
/// alive. The stream ends on a close frame or a read error.
fn inbound_frames(ws_rx: SplitStream<WebSocket>, liveness: Arc<Liveness>) -> InboundFrames {
    let state = (ws_rx, liveness);
    Box::pin(futures::stream::unfold(state, |(mut ws_rx, liveness)| async move {
        loop {
            let message = ws_rx.next().await?;
            if message.is_ok() {
                liveness.mark_alive();
            }
            match message {
                Ok(Message::Text(text)) => {
                    return Some((text.as_str().to_owned(), (ws_rx, liveness)));
                }
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some((text, (ws_rx, liveness))),
                    Err(_) => debug!(len = data.len(), "dropping non-UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "peer sent close frame");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => {
                    debug!(error = %e, "websocket read failed");
                    return None;
                }
            }
        }
    }))
}
