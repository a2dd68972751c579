//! Message model shared by the orchestration engine, the history log, and
//! the tool-loop runner boundary.
//!
//! A [`ManagedAgent`](crate::orchestration::agent::ManagedAgent)'s history is
//! an ordered list of [`AgentMessage`]s. Assistant messages carry
//! [`MessagePart`]s; a tool call part whose [`ApprovalState`] is `Pending` is
//! what drives the approval negotiation loop. All types serialize so that
//! history records can be written as JSONL and replayed on resume.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Gate state of a tool call part.
///
/// The runner marks sensitive calls `Pending`; the manager resolves them to
/// `Approved` or `Denied` through the supervision service before the next
/// model turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApprovalState {
    /// The call is not gated and executes without supervision.
    NotRequired,
    /// The call is gated and awaiting a decision.
    Pending,
    Approved { reason: String },
    Denied { reason: String },
}

/// One piece of a message's content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
        approval: ApprovalState,
    },
}

/// One message in an agent's conversation history.
///
/// `id` and `created_at` define replay order: the history log sorts by
/// creation time with id as tiebreak, and a re-persisted message (same id)
/// replaces the earlier record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    fn new(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            parts,
            created_at: Utc::now(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, vec![MessagePart::Text { text: text.into() }])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![MessagePart::Text { text: text.into() }])
    }

    pub fn assistant(parts: Vec<MessagePart>) -> Self {
        Self::new(Role::Assistant, parts)
    }

    /// True when the message carries no content worth persisting: no parts,
    /// or only whitespace text parts.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| match p {
            MessagePart::Text { text } => text.trim().is_empty(),
            MessagePart::ToolCall { .. } => false,
        })
    }

    /// Concatenated text content, ignoring tool call parts.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text { text } = part {
                out.push_str(text);
            }
        }
        out
    }
}

/// Find the first tool call part still awaiting an approval decision.
///
/// Returns `(call_id, tool_name, arguments)` clones so the caller can drop
/// any lock before resolving the gate.
pub fn find_pending_approval(parts: &[MessagePart]) -> Option<(String, String, serde_json::Value)> {
    parts.iter().find_map(|p| match p {
        MessagePart::ToolCall {
            call_id,
            tool_name,
            arguments,
            approval: ApprovalState::Pending,
        } => Some((call_id.clone(), tool_name.clone(), arguments.clone())),
        _ => None,
    })
}

/// Apply an approval decision in place to the tool call with the given id.
/// Returns true if a matching `Pending` part was updated.
pub fn apply_approval(parts: &mut [MessagePart], call_id: &str, approved: bool, reason: &str) -> bool {
    for part in parts.iter_mut() {
        if let MessagePart::ToolCall {
            call_id: id,
            approval,
            ..
        } = part
        {
            if id == call_id && *approval == ApprovalState::Pending {
                *approval = if approved {
                    ApprovalState::Approved {
                        reason: reason.to_string(),
                    }
                } else {
                    ApprovalState::Denied {
                        reason: reason.to_string(),
                    }
                };
                return true;
            }
        }
    }
    false
}
