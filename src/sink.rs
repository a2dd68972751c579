//! Output sink: the push channel a UI consumes for live agent display.
//!
//! Events are keyed by agent id so one sink can multiplex every agent in a
//! session. Emission is fire-and-forget; a closed or slow consumer must
//! never stall an execution cycle.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Lifecycle event pushed to the embedding UI.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SinkEvent {
    /// An execution cycle began.
    Started { agent_id: String },
    /// Incremental assistant text.
    Delta { agent_id: String, text: String },
    /// A tool call started inside the runner.
    ToolCall {
        agent_id: String,
        call_id: String,
        tool_name: String,
    },
    /// The execution cycle finished and the agent reached a result.
    Ended { agent_id: String },
    /// The execution cycle failed.
    Error { agent_id: String, message: String },
}

/// Push channel for live display. Implementations must not block.
pub trait OutputSink: Send + Sync {
    fn emit(&self, event: SinkEvent);
}

/// Sink backed by an unbounded mpsc channel. Send errors are ignored -- the
/// consumer may have shut down before its agents finished.
pub struct ChannelSink {
    tx: UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<SinkEvent>) -> Arc<Self> {
        Arc::new(Self { tx })
    }
}

impl OutputSink for ChannelSink {
    fn emit(&self, event: SinkEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink that discards everything. Used for headless agents and tests.
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&self, _event: SinkEvent) {}
}
