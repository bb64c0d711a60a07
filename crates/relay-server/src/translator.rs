//! Request id translation between robot sessions and the shared tool link.
//!
//! Robots pick their own request ids, so two robots may both send `id: 5`.
//! Before a request goes upstream its id is replaced with
//! `{connection_id}:{original_id}`; the matching response is mapped back and
//! routed to the robot that asked. Each mapping is used at most once.

use dashmap::DashMap;
use relay_core::{ConnectionId, Envelope, RequestId};
use serde_json::Value;
use tracing::{debug, warn};

/// Why a tool message could not be routed back to a robot.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum Unroutable {
    #[error("message carries no id")]
    NoId,
    #[error("no request in flight for id {0}")]
    UnknownId(String),
}

#[derive(Debug)]
struct PendingRequest {
    connection_id: ConnectionId,
    original_id: RequestId,
}

/// In-flight request table keyed by outer id.
#[derive(Debug, Default)]
pub struct IdTranslator {
    pending: DashMap<String, PendingRequest>,
}

/// Wire id used upstream for `original` sent by `connection_id`.
pub fn outer_id(connection_id: &ConnectionId, original: &RequestId) -> String {
    format!("{connection_id}:{original}")
}

impl IdTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag a robot message for the upstream hop. Notifications pass through
    /// untouched; the input is never mutated.
    pub fn transform(&self, message: &Envelope, connection_id: &ConnectionId) -> Envelope {
        let Some(original_id) = message.id() else {
            return message.clone();
        };
        let outer = outer_id(connection_id, &original_id);
        let previous = self.pending.insert(
            outer.clone(),
            PendingRequest {
                connection_id: *connection_id,
                original_id,
            },
        );
        if previous.is_some() {
            warn!(outer_id = %outer, "request id reused while still in flight, earlier request will not be answered");
        }
        message.with_id(Value::String(outer))
    }

    /// Map a tool message back to its requester. A successful restore
    /// consumes the mapping.
    pub fn restore(&self, message: &Envelope) -> Result<(ConnectionId, Envelope), Unroutable> {
        let id = message.id().ok_or(Unroutable::NoId)?;
        let key = id.to_string();
        let Some((_, pending)) = self.pending.remove(&key) else {
            debug!(outer_id = %key, "no mapping for tool message id");
            return Err(Unroutable::UnknownId(key));
        };
        let restored = message.with_id(pending.original_id.to_value());
        Ok((pending.connection_id, restored))
    }

    /// Drop a mapping whose request never made it upstream.
    pub fn discard(&self, outer_id: &str) -> bool {
        self.pending.remove(outer_id).is_some()
    }

    /// Drop every mapping owned by `connection_id`. Returns how many went.
    pub fn purge(&self, connection_id: &ConnectionId) -> usize {
        let mut removed = 0;
        self.pending.retain(|_, pending| {
            let keep = pending.connection_id != *connection_id;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Requests in flight for one connection.
    pub fn pending_for(&self, connection_id: &ConnectionId) -> usize {
        self.pending
            .iter()
            .filter(|entry| entry.connection_id == *connection_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
