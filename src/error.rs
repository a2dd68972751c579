use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config at {path}: {message}")]
    ParseError { path: PathBuf, message: String },
}

/// Errors raised synchronously at spawn time, before any agent state is
/// allocated. Never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Max concurrent agents ({limit}) reached; wait for a running agent to finish")]
    MaxConcurrent { limit: usize },

    #[error("Max spawn depth ({limit}) reached at depth {depth}; nested agents may not spawn further sub-agents")]
    MaxDepth { depth: usize, limit: usize },
}

/// Errors from agent lookup and input delivery.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent not found: {id}")]
    NotFound { id: String },

    #[error("Agent {id} is shut down; a spawn context is required to reactivate it")]
    ContextRequired { id: String },
}

/// Errors surfaced by the approval gate when the human escalation tier
/// breaks, as opposed to an explicit denial (which is a decision, not an
/// error, and is applied to the tool call in place).
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval request for call {call_id} timed out after {timeout_secs}s")]
    Timeout { call_id: String, timeout_secs: u64 },

    #[error("Approval bridge failed for call {call_id}: {message}")]
    Bridge { call_id: String, message: String },
}

/// Errors from replaying a persisted agent history. Both variants are
/// reported to callers as the `not_found` query outcome; the distinction is
/// kept for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("No persisted history found for agent {id}")]
    NotFound { id: String },

    #[error("Failed to read history for agent {id}: {message}")]
    Unreadable { id: String, message: String },
}
