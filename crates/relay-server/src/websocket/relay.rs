//! Per-connection relay loop, independent of the socket type.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{Stream, StreamExt};
use metrics::{counter, gauge};
use relay_core::{AgentId, ConnectionId, Envelope, ErrorObject, Response};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::connection::{PeerLink, CLOSE_GOING_AWAY};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, FORWARD_FAILURES_TOTAL, FRAMES_TOTAL, UNROUTABLE_TOTAL,
};
use crate::protocol::{reject_unlisted, LocalRequest, ProtocolInterpreter};
use crate::registry::{ConnectionRegistry, ForwardError};
use crate::translator::Unroutable;

/// Which endpoint a connection arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerKind {
    /// The upstream link exposing tools for an agent.
    Tool,
    /// A downstream client.
    Robot,
    /// A client that only speaks the local control methods.
    Protocol,
}

impl PeerKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tool => "tool",
            Self::Robot => "robot",
            Self::Protocol => "protocol",
        }
    }
}

/// Removes the connection from the registry when dropped, whether the loop
/// returned, panicked or was cancelled.
struct Registration {
    kind: PeerKind,
    agent_id: AgentId,
    connection_id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    opened_at: Instant,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = match self.kind {
            PeerKind::Tool => self.registry.release_tool(&self.agent_id, &self.connection_id),
            PeerKind::Robot => self.registry.unregister_robot(&self.connection_id),
            PeerKind::Protocol => false,
        };
        gauge!(CONNECTIONS_ACTIVE, "kind" => self.kind.as_str()).decrement(1.0);
        info!(
            kind = self.kind.as_str(),
            agent_id = %self.agent_id,
            connection_id = %self.connection_id,
            removed,
            duration_secs = self.opened_at.elapsed().as_secs(),
            "connection closed"
        );
    }
}

enum Read {
    Frame(String),
    Idle,
    Ended,
}

/// One authenticated connection: its identity, its write handle and the
/// shared state its frames are routed through.
pub struct RelaySession {
    kind: PeerKind,
    agent_id: AgentId,
    connection_id: ConnectionId,
    link: PeerLink,
    registry: Arc<ConnectionRegistry>,
    interpreter: Arc<ProtocolInterpreter>,
    _registration: Registration,
}

impl RelaySession {
    /// Register the connection and return the session that owns it.
    /// Protocol connections get an id but are never registered.
    pub fn open(
        kind: PeerKind,
        agent_id: AgentId,
        link: PeerLink,
        registry: Arc<ConnectionRegistry>,
        interpreter: Arc<ProtocolInterpreter>,
    ) -> Self {
        let connection_id = match kind {
            PeerKind::Tool => registry.register_tool(agent_id.clone(), link.clone()),
            PeerKind::Robot => registry.register_robot(agent_id.clone(), link.clone()),
            PeerKind::Protocol => ConnectionId::new(),
        };
        counter!(CONNECTIONS_TOTAL, "kind" => kind.as_str()).increment(1);
        gauge!(CONNECTIONS_ACTIVE, "kind" => kind.as_str()).increment(1.0);
        info!(kind = kind.as_str(), agent_id = %agent_id, connection_id = %connection_id, "connection opened");

        let registration = Registration {
            kind,
            agent_id: agent_id.clone(),
            connection_id,
            registry: registry.clone(),
            opened_at: Instant::now(),
        };
        Self {
            kind,
            agent_id,
            connection_id,
            link,
            registry,
            interpreter,
            _registration: registration,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Process inbound frames until the stream ends, the link is closed by
    /// someone else, or `shutdown` fires. Consumes the session so that
    /// unregistration happens on every exit path.
    ///
    /// With a `read_timeout`, a read that yields nothing in time is a
    /// liveness no-op and the loop keeps going.
    pub async fn run<S>(self, mut frames: S, read_timeout: Option<Duration>, shutdown: CancellationToken)
    where
        S: Stream<Item = String> + Unpin,
    {
        loop {
            let read = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    if let Err(e) = self.link.close(CLOSE_GOING_AWAY, "server shutting down") {
                        debug!(error = %e, "close frame not queued");
                    }
                    break;
                }
                _ = self.link.closed() => {
                    debug!(connection_id = %self.connection_id, "link closed, leaving read loop");
                    break;
                }
                read = next_frame(&mut frames, read_timeout) => read,
            };
            match read {
                Read::Frame(text) => self.handle_frame(&text).await,
                Read::Idle => continue,
                Read::Ended => break,
            }
        }
    }

    /// Decode, classify and route one inbound text frame.
    pub async fn handle_frame(&self, text: &str) {
        counter!(FRAMES_TOTAL, "kind" => self.kind.as_str()).increment(1);

        let envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(kind = self.kind.as_str(), error = %e, "rejecting undecodable frame");
                self.reply(Response::error(None, e.to_error_object())).await;
                return;
            }
        };

        if let Some(request) = LocalRequest::classify(&envelope) {
            if let Some(response) = self.interpreter.handle(request).await {
                self.reply(response).await;
            }
            return;
        }

        match self.kind {
            PeerKind::Robot => self.forward_upstream(envelope).await,
            PeerKind::Tool => self.route_downstream(envelope).await,
            PeerKind::Protocol => {
                if let Some(response) = reject_unlisted(&envelope) {
                    self.reply(response).await;
                }
            }
        }
    }

    async fn forward_upstream(&self, envelope: Envelope) {
        let translator = self.registry.translator();
        let original_id = envelope.id();
        let tagged = translator.transform(&envelope, &self.connection_id);
        let outer_id = tagged.id();

        let Err(e) = self
            .registry
            .forward_to_tool(&self.agent_id, tagged.to_string())
            .await
        else {
            return;
        };

        counter!(FORWARD_FAILURES_TOTAL, "kind" => "tool", "reason" => e.reason()).increment(1);
        warn!(agent_id = %self.agent_id, connection_id = %self.connection_id, error = %e, "forward to tool failed");
        if let Some(outer) = outer_id {
            translator.discard(&outer.to_string());
        }
        // Notifications get no error back.
        let Some(id) = original_id else {
            return;
        };
        let error = match &e {
            ForwardError::ToolNotConnected(agent) => ErrorObject::tool_not_connected(agent.as_str()),
            other => ErrorObject::forward_failed(self.agent_id.as_str(), other.to_string()),
        };
        self.reply(Response::error(Some(id), error)).await;
    }

    async fn route_downstream(&self, envelope: Envelope) {
        match self.registry.translator().restore(&envelope) {
            Ok((robot, restored)) => {
                if let Err(e) = self.registry.forward_to_robot(&robot, restored.to_string()).await {
                    counter!(FORWARD_FAILURES_TOTAL, "kind" => "robot", "reason" => e.reason())
                        .increment(1);
                    warn!(connection_id = %robot, error = %e, "response could not be delivered to robot");
                }
            }
            Err(Unroutable::NoId) => {
                debug!(agent_id = %self.agent_id, "dropping tool message without id");
            }
            Err(e @ Unroutable::UnknownId(_)) => {
                counter!(UNROUTABLE_TOTAL).increment(1);
                warn!(agent_id = %self.agent_id, error = %e, "dropping unroutable tool message");
            }
        }
    }

    async fn reply(&self, response: Response) {
        let text = match response.encode() {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "failed to encode response");
                return;
            }
        };
        if let Err(e) = self.link.send(text).await {
            debug!(connection_id = %self.connection_id, error = %e, "reply not delivered");
        }
    }
}

async fn next_frame<S>(frames: &mut S, read_timeout: Option<Duration>) -> Read
where
    S: Stream<Item = String> + Unpin,
{
    let next = match read_timeout {
        Some(limit) => match tokio::time::timeout(limit, frames.next()).await {
            Ok(next) => next,
            Err(_) => return Read::Idle,
        },
        None => frames.next().await,
    };
    match next {
        Some(text) => Read::Frame(text),
        None => Read::Ended,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerInfo;
    use crate::websocket::connection::{Outbound, CLOSE_NORMAL};
    use crate::websocket::heartbeat::{close_when_silent, HeartbeatResult, Liveness};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use relay_core::{ContentBlock, ToolDescriptor, ToolError, ToolInvoker, ToolOutput};
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::ReceiverStream;

    struct Harness {
        registry: Arc<ConnectionRegistry>,
        interpreter: Arc<ProtocolInterpreter>,
    }

    impl Harness {
        fn new() -> Self {
            Self::with_invoker(Arc::new(relay_tools::builtin_registry()))
        }

        fn with_invoker(invoker: Arc<dyn ToolInvoker>) -> Self {
            Self {
                registry: Arc::new(ConnectionRegistry::new()),
                interpreter: Arc::new(ProtocolInterpreter::new(
                    invoker,
                    ServerInfo::default(),
                    Duration::from_secs(10),
                )),
            }
        }

        fn open(&self, kind: PeerKind) -> (RelaySession, mpsc::Receiver<Outbound>) {
            let (session, _link, rx) = self.open_linked(kind);
            (session, rx)
        }

        /// Like `open`, also handing back a clone of the session's link.
        fn open_linked(&self, kind: PeerKind) -> (RelaySession, PeerLink, mpsc::Receiver<Outbound>) {
            let (link, rx) = PeerLink::new(16);
            let session = RelaySession::open(
                kind,
                AgentId::from_raw("default_agent"),
                link.clone(),
                self.registry.clone(),
                self.interpreter.clone(),
            );
            (session, link, rx)
        }
    }

    /// Never finishes `sleepy` within the request timeout; answers anything
    /// else with its own name.
    struct SleepyInvoker;

    #[async_trait]
    impl ToolInvoker for SleepyInvoker {
        fn tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "sleepy".into(),
                description: None,
                input_schema: None,
            }]
        }

        async fn invoke(&self, name: &str, _arguments: Value) -> Result<ToolOutput, ToolError> {
            if name == "sleepy" {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(ToolOutput::Text(vec![ContentBlock::text(name)]))
        }
    }

    fn text_json(out: Option<Outbound>) -> Value {
        match out {
            Some(Outbound::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    fn recv_json(rx: &mut mpsc::Receiver<Outbound>) -> Value {
        text_json(rx.try_recv().ok())
    }

    #[tokio::test]
    async fn colliding_robot_ids_route_to_their_owner() {
        let h = Harness::new();
        let (tool, mut tool_rx) = h.open(PeerKind::Tool);
        let (u1, mut u1_rx) = h.open(PeerKind::Robot);
        let (u2, mut u2_rx) = h.open(PeerKind::Robot);

        let request = r#"{"jsonrpc":"2.0","method":"robot/move","params":{"x":1},"id":5}"#;
        u1.handle_frame(request).await;
        u2.handle_frame(request).await;

        let first = recv_json(&mut tool_rx);
        let second = recv_json(&mut tool_rx);
        assert_eq!(first["id"], format!("{}:5", u1.connection_id()));
        assert_eq!(second["id"], format!("{}:5", u2.connection_id()));
        assert_eq!(first["params"], json!({"x": 1}));

        let reply = json!({"jsonrpc": "2.0", "id": format!("{}:5", u1.connection_id()), "result": "ok-foo"});
        tool.handle_frame(&reply.to_string()).await;

        assert_eq!(recv_json(&mut u1_rx), json!({"jsonrpc": "2.0", "id": 5, "result": "ok-foo"}));
        assert!(u2_rx.try_recv().is_err());
        assert_eq!(h.registry.translator().pending_for(&u2.connection_id()), 1);
    }

    #[tokio::test]
    async fn initialized_notification_writes_nothing() {
        let h = Harness::new();
        let (_tool, mut tool_rx) = h.open(PeerKind::Tool);
        let (robot, mut robot_rx) = h.open(PeerKind::Robot);

        robot
            .handle_frame(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;

        assert!(robot_rx.try_recv().is_err());
        assert!(tool_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn local_methods_are_answered_on_every_endpoint() {
        let h = Harness::new();
        for kind in [PeerKind::Tool, PeerKind::Robot, PeerKind::Protocol] {
            let (session, mut rx) = h.open(kind);
            session
                .handle_frame(r#"{"jsonrpc":"2.0","method":"tools/list","id":"a"}"#)
                .await;
            let resp = recv_json(&mut rx);
            assert_eq!(resp["id"], "a");
            assert!(resp["result"]["tools"].as_array().unwrap().len() >= 5);
        }
    }

    #[tokio::test]
    async fn tools_call_without_name_never_forwards() {
        let h = Harness::new();
        let (_tool, mut tool_rx) = h.open(PeerKind::Tool);
        let (robot, mut robot_rx) = h.open(PeerKind::Robot);

        robot
            .handle_frame(r#"{"jsonrpc":"2.0","method":"tools/call","params":{},"id":3}"#)
            .await;

        let resp = recv_json(&mut robot_rx);
        assert_eq!(resp["id"], 3);
        assert_eq!(resp["error"]["code"], -32602);
        assert!(tool_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_v2_frames_are_forwarded_untouched_by_interpreter() {
        let h = Harness::new();
        let (_tool, mut tool_rx) = h.open(PeerKind::Tool);
        let (robot, mut robot_rx) = h.open(PeerKind::Robot);

        robot.handle_frame(r#"{"method":"tools/list","id":1}"#).await;

        let forwarded = recv_json(&mut tool_rx);
        assert_eq!(forwarded["method"], "tools/list");
        assert_eq!(forwarded["id"], format!("{}:1", robot.connection_id()));
        assert!(robot_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_tool_yields_not_connected_and_no_mapping() {
        let h = Harness::new();
        let (robot, mut rx) = h.open(PeerKind::Robot);

        robot
            .handle_frame(r#"{"jsonrpc":"2.0","method":"robot/move","id":7}"#)
            .await;

        let resp = recv_json(&mut rx);
        assert_eq!(resp["id"], 7);
        assert_eq!(resp["error"]["code"], -32001);
        assert_eq!(resp["error"]["data"]["agent_id"], "default_agent");
        assert!(h.registry.translator().is_empty());
    }

    #[tokio::test]
    async fn failed_write_yields_forward_failed() {
        let h = Harness::new();
        let (_tool, tool_rx) = h.open(PeerKind::Tool);
        drop(tool_rx);
        let (robot, mut rx) = h.open(PeerKind::Robot);

        robot
            .handle_frame(r#"{"jsonrpc":"2.0","method":"robot/move","id":"m1"}"#)
            .await;

        let resp = recv_json(&mut rx);
        assert_eq!(resp["id"], "m1");
        assert_eq!(resp["error"]["code"], -32002);
        assert!(h.registry.translator().is_empty());
    }

    #[tokio::test]
    async fn undeliverable_notification_gets_no_error() {
        let h = Harness::new();
        let (robot, mut rx) = h.open(PeerKind::Robot);
        robot.handle_frame(r#"{"jsonrpc":"2.0","method":"robot/status"}"#).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn decode_failures_are_answered_with_null_id() {
        let h = Harness::new();
        let (robot, mut rx) = h.open(PeerKind::Robot);

        robot.handle_frame("{not json").await;
        let resp = recv_json(&mut rx);
        assert_eq!(resp["id"], Value::Null);
        assert_eq!(resp["error"]["code"], -32700);

        robot.handle_frame(r#"[{"jsonrpc":"2.0","method":"a","id":1}]"#).await;
        assert_eq!(recv_json(&mut rx)["error"]["code"], -32600);

        robot.handle_frame(r#"{"jsonrpc":"2.0","method":"a","id":{"x":1}}"#).await;
        assert_eq!(recv_json(&mut rx)["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn protocol_endpoint_rejects_non_local_requests() {
        let h = Harness::new();
        let (session, mut rx) = h.open(PeerKind::Protocol);
        assert_eq!(h.registry.stats().robot_count, 0);
        assert_eq!(h.registry.stats().tool_count, 0);

        session
            .handle_frame(r#"{"jsonrpc":"2.0","method":"robot/move","id":1}"#)
            .await;
        let resp = recv_json(&mut rx);
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["error"]["data"]["method"], "robot/move");

        session.handle_frame(r#"{"jsonrpc":"2.0","method":"robot/ping"}"#).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn tool_messages_without_mapping_are_dropped() {
        let h = Harness::new();
        let (tool, _tool_rx) = h.open(PeerKind::Tool);
        let (_robot, mut robot_rx) = h.open(PeerKind::Robot);

        tool.handle_frame(r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#)
            .await;
        tool.handle_frame(r#"{"jsonrpc":"2.0","id":"nobody:1","result":1}"#)
            .await;

        assert!(robot_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn robot_disconnect_purges_pending_requests() {
        let h = Harness::new();
        let (tool, mut tool_rx) = h.open(PeerKind::Tool);
        let (robot, mut robot_rx) = h.open(PeerKind::Robot);
        let robot_id = robot.connection_id();

        let (frames_tx, frames_rx) = mpsc::channel(4);
        let task = tokio::spawn(robot.run(
            ReceiverStream::new(frames_rx),
            None,
            CancellationToken::new(),
        ));
        for id in [1, 2] {
            frames_tx
                .send(format!(r#"{{"jsonrpc":"2.0","method":"robot/move","id":{id}}}"#))
                .await
                .unwrap();
        }
        let first = text_json(tool_rx.recv().await);
        let _second = text_json(tool_rx.recv().await);
        assert_eq!(h.registry.translator().pending_for(&robot_id), 2);

        drop(frames_tx);
        task.await.unwrap();

        assert_eq!(h.registry.robot_count(), 0);
        assert!(h.registry.translator().is_empty());

        let late = json!({"jsonrpc": "2.0", "id": first["id"], "result": "late"});
        tool.handle_frame(&late.to_string()).await;
        assert!(robot_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn replaced_tool_session_exits_without_evicting_successor() {
        let h = Harness::new();
        let (old, mut old_rx) = h.open(PeerKind::Tool);
        let (_frames_tx, frames_rx) = mpsc::channel::<String>(1);
        let task = tokio::spawn(old.run(ReceiverStream::new(frames_rx), None, CancellationToken::new()));

        let (_new, mut new_rx) = h.open(PeerKind::Tool);
        task.await.unwrap();

        assert_matches!(old_rx.recv().await, Some(Outbound::Close { code: CLOSE_NORMAL, .. }));
        assert!(h.registry.is_tool_connected(&AgentId::from_raw("default_agent")));

        h.registry
            .forward_to_tool(&AgentId::from_raw("default_agent"), "hello".into())
            .await
            .unwrap();
        assert_eq!(new_rx.recv().await, Some(Outbound::Text("hello".into())));
    }

    #[tokio::test]
    async fn shutdown_closes_with_going_away() {
        let h = Harness::new();
        let (robot, mut rx) = h.open(PeerKind::Robot);
        let shutdown = CancellationToken::new();
        let (_frames_tx, frames_rx) = mpsc::channel::<String>(1);
        let task = tokio::spawn(robot.run(ReceiverStream::new(frames_rx), None, shutdown.clone()));

        shutdown.cancel();
        task.await.unwrap();

        assert_matches!(rx.recv().await, Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. }));
        assert_eq!(h.registry.robot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_reads_keep_protocol_session_alive() {
        let h = Harness::new();
        let (session, mut rx) = h.open(PeerKind::Protocol);
        let (frames_tx, frames_rx) = mpsc::channel::<String>(1);
        let task = tokio::spawn(session.run(
            ReceiverStream::new(frames_rx),
            Some(Duration::from_secs(10)),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_secs(35)).await;
        frames_tx
            .send(r#"{"jsonrpc":"2.0","method":"initialize","id":1}"#.to_string())
            .await
            .unwrap();
        let resp = text_json(rx.recv().await);
        assert_eq!(resp["result"]["protocolVersion"], "2024-11-05");

        drop(frames_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_leaves_connection_serving() {
        let h = Harness::with_invoker(Arc::new(SleepyInvoker));
        let (robot, mut rx) = h.open(PeerKind::Robot);
        let (frames_tx, frames_rx) = mpsc::channel(4);
        let task = tokio::spawn(robot.run(
            ReceiverStream::new(frames_rx),
            None,
            CancellationToken::new(),
        ));

        for (id, name) in [(1, "sleepy"), (2, "quick")] {
            let call = json!({"jsonrpc": "2.0", "method": "tools/call", "params": {"name": name}, "id": id});
            frames_tx.send(call.to_string()).await.unwrap();
        }

        let first = text_json(rx.recv().await);
        assert_eq!(first["id"], 1);
        assert_eq!(first["error"]["code"], -32603);
        assert_eq!(first["error"]["data"]["detail"], "Request timeout after 10 seconds");

        let second = text_json(rx.recv().await);
        assert_eq!(second["id"], 2);
        assert_eq!(second["result"]["content"][0]["text"], "quick");
        assert_eq!(h.registry.robot_count(), 1);

        drop(frames_tx);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn silent_tool_is_unregistered_after_missed_heartbeats() {
        let h = Harness::new();
        let agent = AgentId::from_raw("default_agent");
        let (tool, link, mut tool_rx) = h.open_linked(PeerKind::Tool);
        let watch = tokio::spawn(close_when_silent(
            link,
            Arc::new(Liveness::new()),
            Duration::from_secs(1),
            Duration::from_secs(3),
            CancellationToken::new(),
        ));

        // The peer never sends anything, not even a pong.
        let (_frames_tx, frames_rx) = mpsc::channel::<String>(1);
        tool.run(ReceiverStream::new(frames_rx), None, CancellationToken::new())
            .await;

        assert_eq!(watch.await.unwrap(), HeartbeatResult::TimedOut);
        assert!(!h.registry.is_tool_connected(&agent));
        assert_matches!(tool_rx.recv().await, Some(Outbound::Close { code: CLOSE_GOING_AWAY, .. }));

        let (robot, mut robot_rx) = h.open(PeerKind::Robot);
        robot
            .handle_frame(r#"{"jsonrpc":"2.0","method":"robot/move","id":1}"#)
            .await;
        assert_eq!(recv_json(&mut robot_rx)["error"]["code"], -32001);
    }
}
