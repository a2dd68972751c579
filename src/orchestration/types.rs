//! Shared vocabulary of the orchestration subsystem.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::sink::OutputSink;

/// Unique identifier for a managed agent. UUID v4 strings, readable in logs
/// and tool output.
pub type AgentId = String;

/// Lifecycle status of a managed agent.
///
/// `NotFound` is a query result for ids with no resident agent, never a
/// stored state. The terminal set is what `wait` resolves on and what the
/// TTL eviction re-checks before removing an agent from memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Shutdown,
    NotFound,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Completed
                | AgentStatus::Failed
                | AgentStatus::Shutdown
                | AgentStatus::NotFound
        )
    }
}

/// Read-only view of a managed agent, returned by status queries.
#[derive(Clone, Debug, Serialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub name: String,
    pub task: String,
    pub status: AgentStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub depth: usize,
    pub created_at: DateTime<Utc>,
    pub resumed_from_log: bool,
}

/// Result of a `wait` call: whether the timeout fired first, plus the status
/// of every requested id at resolution time.
#[derive(Clone, Debug)]
pub struct WaitOutcome {
    pub timed_out: bool,
    pub statuses: HashMap<AgentId, AgentStatus>,
}

/// Per-call-chain context threaded explicitly through spawn, resume, and
/// input delivery.
///
/// The nesting stack holds the agent ids of the enclosing execution cycles,
/// innermost last; its length is the spawn depth checked at spawn time. Each
/// execution cycle derives a child context via [`SpawnContext::nested`] and
/// hands it to the tool-loop runner, so a spawn tool running inside a
/// sub-agent observes the correct depth.
#[derive(Clone)]
pub struct SpawnContext {
    pub session_id: String,
    /// Model override for the spawned agent; the runner interprets it.
    pub model: Option<String>,
    /// Id of the tool-call message that requested the spawn, if any.
    pub parent_message_id: Option<String>,
    pub sink: Arc<dyn OutputSink>,
    pub nesting: Vec<AgentId>,
}

impl SpawnContext {
    pub fn new(session_id: impl Into<String>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            session_id: session_id.into(),
            model: None,
            parent_message_id: None,
            sink,
            nesting: Vec::new(),
        }
    }

    /// Spawn depth implied by this context.
    pub fn depth(&self) -> usize {
        self.nesting.len()
    }

    /// Child context for work running inside the given agent's cycle.
    pub(crate) fn nested(&self, agent_id: &str) -> Self {
        let mut child = self.clone();
        child.nesting.push(agent_id.to_string());
        child
    }
}
