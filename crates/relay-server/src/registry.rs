//! Live tool and robot connections.

use std::time::Instant;

use dashmap::DashMap;
use relay_core::{AgentId, ConnectionId};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::translator::IdTranslator;
use crate::websocket::connection::{LinkError, PeerLink, CLOSE_NORMAL};

/// Why a frame could not be handed to its destination.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("no tool connection for agent {0}")]
    ToolNotConnected(AgentId),
    #[error("no robot connection {0}")]
    RobotNotConnected(ConnectionId),
    #[error("write to {target} failed: {source}")]
    SendFailed {
        target: String,
        #[source]
        source: LinkError,
    },
}

impl ForwardError {
    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ToolNotConnected(_) | Self::RobotNotConnected(_) => "not_connected",
            Self::SendFailed { .. } => "send_failed",
        }
    }
}

struct ToolEntry {
    connection_id: ConnectionId,
    link: PeerLink,
    connected_at: Instant,
}

struct RobotEntry {
    agent_id: AgentId,
    link: PeerLink,
    connected_at: Instant,
}

/// Snapshot for the health endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub tool_count: usize,
    pub robot_count: usize,
    pub mapping_count: usize,
    pub tool_agent_ids: Vec<String>,
    pub robot_uuids: Vec<String>,
}

/// Tables shared by every connection task: tools keyed by agent, robots keyed
/// by connection id, and the in-flight id mappings.
///
/// Shard guards are never held across an `.await`; forwards clone the link
/// out before writing.
#[derive(Default)]
pub struct ConnectionRegistry {
    tools: DashMap<AgentId, ToolEntry>,
    robots: DashMap<ConnectionId, RobotEntry>,
    translator: IdTranslator,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The id translator shared by every robot and tool session.
    pub fn translator(&self) -> &IdTranslator {
        &self.translator
    }

    /// Register the tool connection for `agent_id`. An existing connection
    /// for the same agent is closed and replaced.
    pub fn register_tool(&self, agent_id: AgentId, link: PeerLink) -> ConnectionId {
        let connection_id = ConnectionId::new();
        let previous = self.tools.insert(
            agent_id.clone(),
            ToolEntry {
                connection_id,
                link,
                connected_at: Instant::now(),
            },
        );
        if let Some(old) = previous {
            warn!(
                agent_id = %agent_id,
                old_connection = %old.connection_id,
                new_connection = %connection_id,
                age_secs = old.connected_at.elapsed().as_secs(),
                "replacing existing tool connection"
            );
            if let Err(e) = old.link.close(CLOSE_NORMAL, "replaced by a newer tool connection") {
                warn!(agent_id = %agent_id, error = %e, "failed to close replaced tool connection");
            }
        }
        info!(agent_id = %agent_id, connection_id = %connection_id, "tool connection registered");
        connection_id
    }

    /// Remove the tool connection for `agent_id`, whichever it is.
    pub fn unregister_tool(&self, agent_id: &AgentId) -> bool {
        self.tools.remove(agent_id).is_some()
    }

    /// Remove the tool connection for `agent_id` only if it is still
    /// `connection_id`. A replaced connection's cleanup leaves its successor
    /// alone.
    pub fn release_tool(&self, agent_id: &AgentId, connection_id: &ConnectionId) -> bool {
        self.tools
            .remove_if(agent_id, |_, entry| entry.connection_id == *connection_id)
            .is_some()
    }

    pub fn is_tool_connected(&self, agent_id: &AgentId) -> bool {
        self.tools.contains_key(agent_id)
    }

    /// Register a robot connection and return its server-generated id.
    pub fn register_robot(&self, agent_id: AgentId, link: PeerLink) -> ConnectionId {
        let connection_id = ConnectionId::new();
        info!(agent_id = %agent_id, connection_id = %connection_id, "robot connection registered");
        self.robots.insert(
            connection_id,
            RobotEntry {
                agent_id,
                link,
                connected_at: Instant::now(),
            },
        );
        connection_id
    }

    /// Remove a robot connection and every request it still has in flight.
    pub fn unregister_robot(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, entry)) = self.robots.remove(connection_id) else {
            return false;
        };
        let purged = self.translator.purge(connection_id);
        debug!(
            agent_id = %entry.agent_id,
            connection_id = %connection_id,
            purged,
            age_secs = entry.connected_at.elapsed().as_secs(),
            "robot connection removed"
        );
        true
    }

    /// Agent a robot connection belongs to.
    pub fn robot_agent(&self, connection_id: &ConnectionId) -> Option<AgentId> {
        self.robots.get(connection_id).map(|e| e.agent_id.clone())
    }

    /// Write one frame to the tool connection of `agent_id`. A failed write
    /// does not unregister anything; the connection's own loop does that.
    pub async fn forward_to_tool(&self, agent_id: &AgentId, text: String) -> Result<(), ForwardError> {
        let link = self
            .tools
            .get(agent_id)
            .map(|entry| entry.link.clone())
            .ok_or_else(|| ForwardError::ToolNotConnected(agent_id.clone()))?;
        link.send(text).await.map_err(|source| ForwardError::SendFailed {
            target: format!("tool {agent_id}"),
            source,
        })
    }

    /// Write one frame to a robot connection.
    pub async fn forward_to_robot(
        &self,
        connection_id: &ConnectionId,
        text: String,
    ) -> Result<(), ForwardError> {
        let link = self
            .robots
            .get(connection_id)
            .map(|entry| entry.link.clone())
            .ok_or(ForwardError::RobotNotConnected(*connection_id))?;
        link.send(text).await.map_err(|source| ForwardError::SendFailed {
            target: format!("robot {connection_id}"),
            source,
        })
    }

    /// Number of agents with a live tool connection.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Number of registered robot connections.
    pub fn robot_count(&self) -> usize {
        self.robots.len()
    }

    /// Snapshot of the tables for the health report. Id lists are sorted.
    pub fn stats(&self) -> RegistryStats {
        let mut tool_agent_ids: Vec<String> =
            self.tools.iter().map(|e| e.key().to_string()).collect();
        tool_agent_ids.sort();
        let mut robot_uuids: Vec<String> =
            self.robots.iter().map(|e| e.key().to_string()).collect();
        robot_uuids.sort();

        RegistryStats {
            tool_count: tool_agent_ids.len(),
            robot_count: robot_uuids.len(),
            mapping_count: self.translator.len(),
            tool_agent_ids,
            robot_uuids,
        }
    }
}
