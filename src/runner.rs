//! Tool-loop runner boundary.
//!
//! The engine never talks to a model provider directly. A [`ToolLoopRunner`]
//! is an opaque executor that turns a message history into a stream of
//! [`RunnerEvent`]s, executing whatever tools it resolves internally. The
//! spawn context is threaded through `run` so that a spawn tool inside the
//! runner sees the correct nesting stack for depth accounting.
//!
//! [`TextModel`] is the narrower single-completion capability used for
//! tier-2 supervision judgments and best-effort preface generation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::message::{AgentMessage, MessagePart};
use crate::orchestration::types::SpawnContext;

/// One event from a runner turn.
#[derive(Clone, Debug)]
pub enum RunnerEvent {
    /// Incremental assistant text.
    TextDelta { text: String },
    /// A tool call started inside the runner (progress notification; gated
    /// calls surface as `Pending` parts in `Finished` instead of executing).
    ToolCall { call_id: String, tool_name: String },
    /// The turn is complete; `parts` is the full assistant response.
    Finished { parts: Vec<MessagePart> },
    /// The runner failed mid-turn.
    Error { message: String },
}

/// Opaque executor for one model turn over a message history.
///
/// Implementations must honor the cancellation token by ending the stream
/// early; partial output already emitted is preserved by the caller.
pub trait ToolLoopRunner: Send + Sync {
    fn run(
        &self,
        messages: Vec<AgentMessage>,
        ctx: SpawnContext,
        cancel: CancellationToken,
    ) -> BoxStream<'static, RunnerEvent>;
}

/// Single-shot text completion, used where the engine needs a model opinion
/// rather than a full tool loop.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}
