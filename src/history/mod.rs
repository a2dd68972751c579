//! Append-only per-agent history with typed replay.
//!
//! Every durable fact about an agent is a [`HistoryRecord`] appended to its
//! log: one metadata record written at first run, then one record per
//! message. Updating a message (resolving an approval on a tool call part)
//! appends the message again under the same id; [`replay`] keeps the latest
//! record per id, so the log stays append-only while replay converges on
//! current state.
//!
//! [`sanitize_dangling_approvals`] is the invariant-restoring pass run after
//! replay: an unclean shutdown can leave the final assistant message with a
//! tool call still `Pending`, and resuming on that history would make the
//! model produce an empty response. The pass denies the call and appends a
//! synthetic continuation message instead.

pub mod jsonl;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{AgentMessage, ApprovalState, MessagePart, Role};

/// One line in an agent's history log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum HistoryRecord {
    /// Written once at first run; carries what replay needs beyond messages.
    Metadata {
        agent_id: String,
        name: String,
        task: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        preface: Option<String>,
        created_at: DateTime<Utc>,
    },
    Message { message: AgentMessage },
}

/// Append-only message store keyed by (session id, agent id).
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(
        &self,
        session_id: &str,
        agent_id: &str,
        record: &HistoryRecord,
    ) -> anyhow::Result<()>;

    /// All records in append order. An agent with no log yields an empty vec.
    async fn read_all(&self, session_id: &str, agent_id: &str) -> anyhow::Result<Vec<HistoryRecord>>;
}

/// State reconstructed from a replayed log.
#[derive(Clone, Debug)]
pub struct ReplayedAgent {
    pub name: String,
    pub task: String,
    pub preface: Option<String>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<AgentMessage>,
}

/// Rebuild agent state from raw log records.
///
/// Messages are deduplicated by id (last record wins) and ordered by
/// creation time with id as tiebreak. Returns `None` when the log holds no
/// metadata record -- without it there is nothing to resume.
pub fn replay(records: Vec<HistoryRecord>) -> Option<ReplayedAgent> {
    let mut meta: Option<(String, String, Option<String>, DateTime<Utc>)> = None;
    let mut latest: HashMap<String, AgentMessage> = HashMap::new();

    for record in records {
        match record {
            HistoryRecord::Metadata {
                name,
                task,
                preface,
                created_at,
                ..
            } => meta = Some((name, task, preface, created_at)),
            HistoryRecord::Message { message } => {
                latest.insert(message.id.clone(), message);
            }
        }
    }

    let (name, task, preface, created_at) = meta?;

    let mut messages: Vec<AgentMessage> = latest.into_values().collect();
    messages.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    Some(ReplayedAgent {
        name,
        task,
        preface,
        created_at,
        messages,
    })
}

/// Text of the synthetic message appended after repairing a dangling
/// approval, instructing the model to continue rather than re-issue the call.
pub const CONTINUATION_NOTICE: &str = "The pending tool call above was denied because the \
session was interrupted before a decision was made. Do not retry it without being asked; \
continue with the task using the information you already have.";

/// Repair a replayed history whose final assistant message still carries an
/// unresolved gated tool call.
///
/// Marks every `Pending` part on the last assistant message `Denied` and
/// appends a continuation system message. Returns the ids of the repaired
/// messages (the updated assistant message first, then the synthetic one) so
/// the caller can re-persist them; empty when no repair was needed.
pub fn sanitize_dangling_approvals(messages: &mut Vec<AgentMessage>) -> Vec<String> {
    let Some(last_assistant) = messages
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::Assistant)
    else {
        return Vec::new();
    };

    let mut repaired = false;
    for part in last_assistant.parts.iter_mut() {
        if let MessagePart::ToolCall { approval, .. } = part {
            if *approval == ApprovalState::Pending {
                *approval = ApprovalState::Denied {
                    reason: "session interrupted before approval".to_string(),
                };
                repaired = true;
            }
        }
    }

    if !repaired {
        return Vec::new();
    }

    let assistant_id = last_assistant.id.clone();
    let notice = AgentMessage::system(CONTINUATION_NOTICE);
    let notice_id = notice.id.clone();
    messages.push(notice);
    vec![assistant_id, notice_id]
}
