//! Session-scoped agent lifecycle manager.
//!
//! [`AgentManager`] owns every [`ManagedAgent`] for one session: it enforces
//! the concurrency and depth limits at spawn, drives execution cycles
//! against the tool-loop runner, runs the approval negotiation loop, and
//! handles recovery from the history log.
//!
//! The manager wraps its state in `Arc` and derives `Clone` so the same
//! instance can be held by the registry, execution tasks, and TTL timers.
//!
//! **Concurrency model:** the agent map is `Mutex<HashMap>` and every
//! mutation happens inside a single lock scope between await points, so no
//! locking beyond the per-agent execution token is needed. Cycles for
//! distinct agents run concurrently; cycles for one agent are serialized by
//! its `exec_lock` no matter how many triggers (spawn, send_input, resume)
//! race to schedule one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use uuid::Uuid;

use super::agent::ManagedAgent;
use super::types::{AgentId, AgentSnapshot, AgentStatus, SpawnContext, WaitOutcome};
use super::EngineServices;
use crate::config::EngineConfig;
use crate::error::{AgentError, RecoveryError, SpawnError};
use crate::history::{self, HistoryLog, HistoryRecord};
use crate::message::AgentMessage;
use crate::runner::{RunnerEvent, TextModel, ToolLoopRunner};
use crate::sink::SinkEvent;
use crate::supervision::bridge::ApprovalBridge;
use crate::supervision::gate::{SupervisionRequest, SupervisionService};

struct ManagerInner {
    session_id: String,
    agents: Mutex<HashMap<AgentId, Arc<ManagedAgent>>>,
    runner: Arc<dyn ToolLoopRunner>,
    history: Arc<dyn HistoryLog>,
    supervisor: Arc<SupervisionService>,
    bridge: Arc<dyn ApprovalBridge>,
    preface_model: Option<Arc<dyn TextModel>>,
    config: EngineConfig,
}

#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<ManagerInner>,
}

impl AgentManager {
    pub fn new(session_id: impl Into<String>, services: &EngineServices) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                session_id: session_id.into(),
                agents: Mutex::new(HashMap::new()),
                runner: Arc::clone(&services.runner),
                history: Arc::clone(&services.history),
                supervisor: Arc::clone(&services.supervisor),
                bridge: Arc::clone(&services.bridge),
                preface_model: services.preface_model.clone(),
                config: services.config.clone(),
            }),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Agents currently in a non-terminal state.
    pub fn running_count(&self) -> usize {
        self.inner
            .agents
            .lock()
            .unwrap()
            .values()
            .filter(|a| !a.status().is_terminal())
            .count()
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<ManagedAgent>> {
        self.inner.agents.lock().unwrap().get(id).cloned()
    }

    pub fn snapshot(&self, id: &str) -> Option<AgentSnapshot> {
        self.get_agent(id).map(|a| a.snapshot())
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        self.inner
            .agents
            .lock()
            .unwrap()
            .values()
            .map(|a| a.snapshot())
            .collect()
    }

    /// Message history snapshot for a resident agent.
    pub fn history_of(&self, id: &str) -> Option<Vec<AgentMessage>> {
        self.get_agent(id).map(|a| a.history())
    }

    // ---- spawn ----

    /// Create a new agent and schedule its first execution cycle.
    ///
    /// Fails fast, before any allocation, when the spawn depth or the
    /// concurrent-agent limit would be exceeded. Returns the new id without
    /// waiting for the cycle to start.
    pub fn spawn(
        &self,
        task: &str,
        name: &str,
        context: &HashMap<String, String>,
        ctx: SpawnContext,
    ) -> Result<AgentId, SpawnError> {
        let depth = ctx.depth();
        if depth >= self.inner.config.max_spawn_depth {
            return Err(SpawnError::MaxDepth {
                depth,
                limit: self.inner.config.max_spawn_depth,
            });
        }

        let mut agents = self.inner.agents.lock().unwrap();
        let running = agents.values().filter(|a| !a.status().is_terminal()).count();
        if running >= self.inner.config.max_concurrent_agents {
            return Err(SpawnError::MaxConcurrent {
                limit: self.inner.config.max_concurrent_agents,
            });
        }

        let id = Uuid::new_v4().to_string();
        let initial = AgentMessage::user(build_task_message(task, context));
        let agent = ManagedAgent::new(
            id.clone(),
            name.to_string(),
            task.to_string(),
            depth,
            vec![initial],
            ctx,
        );
        agent.set_status(AgentStatus::Running);
        agents.insert(id.clone(), Arc::clone(&agent));
        drop(agents);

        tracing::info!(agent_id = %id, name, depth, "spawned sub-agent");
        self.schedule_execution(agent);
        Ok(id)
    }

    /// Queue an execution cycle behind the agent's serialization token.
    ///
    /// A failing cycle is caught and turned into a `fail` transition plus a
    /// sink error event, never an unhandled task panic.
    fn schedule_execution(&self, agent: Arc<ManagedAgent>) {
        let manager = self.clone();
        tokio::spawn(async move {
            let _cycle = agent.exec_lock.lock().await;
            if let Err(e) = manager.execute_agent(&agent).await {
                let message = format!("{e:#}");
                tracing::warn!(agent_id = %agent.id, error = %message, "execution cycle failed");
                agent.context().sink.emit(SinkEvent::Error {
                    agent_id: agent.id.clone(),
                    message: message.clone(),
                });
                manager.fail(&agent.id, &message);
            }
        });
    }

    // ---- execution ----

    /// One full execution cycle: first-run bootstrap, stream/approval loop,
    /// then the queued follow-ups strictly in arrival order.
    async fn execute_agent(&self, agent: &Arc<ManagedAgent>) -> anyhow::Result<()> {
        // Nested context: this agent joins the nesting stack so any spawn
        // issued from inside its tool loop is depth-checked correctly.
        let ctx = agent.context().nested(&agent.id);
        ctx.sink.emit(SinkEvent::Started {
            agent_id: agent.id.clone(),
        });

        if !agent.bootstrapped() {
            // Best-effort preface; failure degrades silently.
            if let Some(model) = &self.inner.preface_model {
                match model.complete(&preface_prompt(&agent.name, &agent.task)).await {
                    Ok(text) if !text.trim().is_empty() => agent.set_preface(text.trim().to_string()),
                    Ok(_) => {}
                    Err(e) => tracing::debug!(
                        agent_id = %agent.id,
                        error = %e,
                        "preface generation failed; continuing without one"
                    ),
                }
            }

            self.inner
                .history
                .append(
                    &self.inner.session_id,
                    &agent.id,
                    &HistoryRecord::Metadata {
                        agent_id: agent.id.clone(),
                        name: agent.name.clone(),
                        task: agent.task.clone(),
                        preface: agent.preface(),
                        created_at: agent.created_at,
                    },
                )
                .await?;
            for message in agent.history() {
                self.inner
                    .history
                    .append(&self.inner.session_id, &agent.id, &HistoryRecord::Message { message })
                    .await?;
            }
            agent.mark_bootstrapped();
        }

        self.run_stream_with_approval(agent, &ctx).await?;

        while let Some(input) = agent.pop_input() {
            let message = AgentMessage::user(input);
            agent.push_history(message.clone());
            self.inner
                .history
                .append(&self.inner.session_id, &agent.id, &HistoryRecord::Message { message })
                .await?;
            self.run_stream_with_approval(agent, &ctx).await?;
        }

        let result = agent.output_text();
        self.complete(&agent.id, &result);
        ctx.sink.emit(SinkEvent::Ended {
            agent_id: agent.id.clone(),
        });
        Ok(())
    }

    /// One model turn: feed the history to the runner and consume its event
    /// stream. Text deltas accumulate into the agent's output and forward to
    /// the sink; the finished assistant message is appended to history and
    /// log unless empty.
    async fn run_stream(&self, agent: &Arc<ManagedAgent>, ctx: &SpawnContext) -> anyhow::Result<()> {
        let messages = agent.runner_messages();
        let cancel = agent.cancel_token();
        let mut stream = self.inner.runner.run(messages, ctx.clone(), cancel);

        while let Some(event) = stream.next().await {
            match event {
                RunnerEvent::TextDelta { text } => {
                    agent.append_output(&text);
                    ctx.sink.emit(SinkEvent::Delta {
                        agent_id: agent.id.clone(),
                        text,
                    });
                }
                RunnerEvent::ToolCall { call_id, tool_name } => {
                    ctx.sink.emit(SinkEvent::ToolCall {
                        agent_id: agent.id.clone(),
                        call_id,
                        tool_name,
                    });
                }
                RunnerEvent::Finished { parts } => {
                    agent.set_last_parts(parts.clone());
                    let message = AgentMessage::assistant(parts);
                    if !message.is_empty() {
                        agent.push_history(message.clone());
                        self.inner
                            .history
                            .append(&self.inner.session_id, &agent.id, &HistoryRecord::Message { message })
                            .await?;
                    }
                }
                RunnerEvent::Error { message } => {
                    anyhow::bail!("tool-loop runner error: {message}");
                }
            }
        }
        Ok(())
    }

    /// The approval negotiation loop: run a model turn, resolve any gated
    /// tool call it left pending, and repeat until none remains.
    ///
    /// The decision is applied in place on the response part and the updated
    /// message is re-persisted under its original id, so conversational
    /// continuity survives both the next turn and a later replay. A bridge
    /// timeout or transport failure propagates as an error and fails the
    /// cycle; an explicit denial is a decision, not a failure.
    async fn run_stream_with_approval(
        &self,
        agent: &Arc<ManagedAgent>,
        ctx: &SpawnContext,
    ) -> anyhow::Result<()> {
        loop {
            self.run_stream(agent, ctx).await?;

            let Some((call_id, tool_name, arguments)) = agent.pending_approval() else {
                return Ok(());
            };

            let request = SupervisionRequest {
                tool_name,
                arguments,
                task_id: agent.id.clone(),
                task_name: agent.name.clone(),
                task_description: agent.task.clone(),
            };
            let resolved = self
                .inner
                .supervisor
                .resolve(
                    &request,
                    self.inner.bridge.as_ref(),
                    &call_id,
                    self.inner.config.approval_timeout_secs,
                )
                .await?;

            tracing::info!(
                agent_id = %agent.id,
                call_id = %call_id,
                approved = resolved.approved,
                "gated tool call resolved"
            );
            if let Some(updated) = agent.apply_approval(&call_id, resolved.approved, &resolved.reason)
            {
                self.inner
                    .history
                    .append(
                        &self.inner.session_id,
                        &agent.id,
                        &HistoryRecord::Message { message: updated },
                    )
                    .await?;
            }
            agent.reset_output();
        }
    }

    // ---- input ----

    /// Deliver a follow-up message to an agent.
    ///
    /// An evicted agent is transparently recovered via `resume` when a
    /// context is supplied. `interrupt` cancels the current token and
    /// installs a fresh one. A non-empty message is enqueued before any
    /// status transition; a terminal agent is then re-armed (a shutdown
    /// agent only with a fresh context).
    pub async fn send_input(
        &self,
        id: &str,
        message: &str,
        interrupt: bool,
        ctx: Option<SpawnContext>,
    ) -> Result<(), AgentError> {
        let agent = match self.get_agent(id) {
            Some(agent) => agent,
            None => {
                let Some(c) = ctx.clone() else {
                    return Err(AgentError::NotFound { id: id.to_string() });
                };
                if self.resume(id, c).await.is_err() {
                    return Err(AgentError::NotFound { id: id.to_string() });
                }
                self.get_agent(id)
                    .ok_or_else(|| AgentError::NotFound { id: id.to_string() })?
            }
        };

        if interrupt {
            agent.interrupt();
        }

        let has_ctx = ctx.is_some();
        if let Some(c) = ctx {
            agent.update_context(c);
        }

        let status = agent.status();
        if status == AgentStatus::Shutdown && !has_ctx {
            return Err(AgentError::ContextRequired { id: id.to_string() });
        }

        let has_message = !message.trim().is_empty();
        if has_message {
            agent.push_input(message.to_string());
        }

        // Re-arm: new input wakes a completed/failed agent; a fresh context
        // reactivates a shutdown one even without input.
        if status.is_terminal() && (has_message || status == AgentStatus::Shutdown) {
            if status == AgentStatus::Shutdown {
                agent.interrupt();
            }
            agent.set_status(AgentStatus::Running);
            self.schedule_execution(agent);
            tracing::debug!(agent_id = %id, "re-armed terminal agent");
        }
        Ok(())
    }

    // ---- wait ----

    /// Block until any of the named agents reaches a terminal state, or the
    /// timeout fires. First-past-the-post: one terminal agent resolves the
    /// whole wait. An unknown id counts as terminal (`not_found`).
    ///
    /// If a terminal state already exists at call time this resolves
    /// synchronously without subscribing to anything.
    pub async fn wait(&self, ids: &[AgentId], timeout: Duration) -> WaitOutcome {
        let mut receivers = Vec::new();
        let mut any_terminal = ids.is_empty();
        {
            let agents = self.inner.agents.lock().unwrap();
            for id in ids {
                match agents.get(id) {
                    Some(agent) => {
                        if agent.status().is_terminal() {
                            any_terminal = true;
                        } else {
                            receivers.push(agent.subscribe());
                        }
                    }
                    None => any_terminal = true,
                }
            }
        }

        if any_terminal {
            return WaitOutcome {
                timed_out: false,
                statuses: self.statuses_for(ids),
            };
        }

        let waiters: Vec<_> = receivers
            .into_iter()
            .map(|mut rx| {
                Box::pin(async move {
                    // Err means the agent was dropped, which only happens
                    // after a terminal transition; either way the wait ends.
                    let _ = rx.wait_for(|s| s.is_terminal()).await;
                })
            })
            .collect();

        let timed_out = tokio::time::timeout(timeout, futures::future::select_all(waiters))
            .await
            .is_err();

        WaitOutcome {
            timed_out,
            statuses: self.statuses_for(ids),
        }
    }

    fn statuses_for(&self, ids: &[AgentId]) -> HashMap<AgentId, AgentStatus> {
        let agents = self.inner.agents.lock().unwrap();
        ids.iter()
            .map(|id| {
                let status = agents
                    .get(id)
                    .map(|a| a.status())
                    .unwrap_or(AgentStatus::NotFound);
                (id.clone(), status)
            })
            .collect()
    }

    // ---- abort / resume ----

    /// Cancel an agent and evict it from the map immediately, freeing its
    /// concurrency slot even while background work unwinds. Returns the
    /// partial output accumulated so far. Persisted history stays durable
    /// for a later `resume`.
    pub fn abort(&self, id: &str) -> Option<String> {
        let agent = self.inner.agents.lock().unwrap().remove(id)?;
        agent.cancel();
        agent.set_status(AgentStatus::Shutdown);
        tracing::info!(agent_id = %id, "agent aborted");
        Some(agent.output_text())
    }

    /// Bring an agent back to running.
    ///
    /// A resident shutdown agent is reactivated in place. An absent agent is
    /// reconstructed from its history log: records replay in creation order
    /// (id as tiebreak), and a dangling gated tool call left by an unclean
    /// shutdown is denied with a synthetic continuation message appended
    /// before the first new turn.
    pub async fn resume(&self, id: &str, ctx: SpawnContext) -> Result<(), RecoveryError> {
        if let Some(agent) = self.get_agent(id) {
            if agent.status() == AgentStatus::Shutdown {
                agent.update_context(ctx);
                agent.interrupt();
                agent.set_status(AgentStatus::Running);
                tracing::info!(agent_id = %id, "reactivated shutdown agent");
                self.schedule_execution(agent);
            }
            return Ok(());
        }

        let records = self
            .inner
            .history
            .read_all(&self.inner.session_id, id)
            .await
            .map_err(|e| RecoveryError::Unreadable {
                id: id.to_string(),
                message: format!("{e:#}"),
            })?;
        if records.is_empty() {
            return Err(RecoveryError::NotFound { id: id.to_string() });
        }
        let Some(replayed) = history::replay(records) else {
            return Err(RecoveryError::Unreadable {
                id: id.to_string(),
                message: "log holds no metadata record".to_string(),
            });
        };

        let mut messages = replayed.messages;
        let repaired = history::sanitize_dangling_approvals(&mut messages);

        let agent = ManagedAgent::rehydrated(
            id.to_string(),
            replayed.name,
            replayed.task,
            replayed.preface,
            replayed.created_at,
            ctx.depth(),
            messages,
            ctx,
        );

        // Re-persist repaired records so the log converges with memory.
        // Best effort: the in-memory state is already consistent.
        for message_id in &repaired {
            if let Some(message) = agent.history().into_iter().find(|m| &m.id == message_id) {
                if let Err(e) = self
                    .inner
                    .history
                    .append(&self.inner.session_id, id, &HistoryRecord::Message { message })
                    .await
                {
                    tracing::warn!(agent_id = %id, error = %e, "failed to persist approval repair");
                }
            }
        }
        if !repaired.is_empty() {
            tracing::info!(agent_id = %id, "repaired dangling approval during resume");
        }

        agent.set_status(AgentStatus::Running);
        self.inner
            .agents
            .lock()
            .unwrap()
            .insert(id.to_string(), Arc::clone(&agent));
        tracing::info!(agent_id = %id, "resumed agent from history log");
        self.schedule_execution(agent);
        Ok(())
    }

    // ---- terminal transitions ----

    pub fn complete(&self, id: &str, result: &str) {
        self.finish(id, AgentStatus::Completed, Some(result.to_string()), None);
    }

    pub fn fail(&self, id: &str, error: &str) {
        self.finish(id, AgentStatus::Failed, None, Some(error.to_string()));
    }

    fn finish(&self, id: &str, status: AgentStatus, result: Option<String>, error: Option<String>) {
        let Some(agent) = self.get_agent(id) else {
            // Already evicted (aborted mid-cycle); nothing to transition.
            return;
        };
        agent.record_outcome(result, error);
        agent.set_status(status);
        tracing::debug!(agent_id = %id, ?status, "agent reached terminal state");

        // TTL eviction, idempotent against an intervening resume: the agent
        // is removed only if still terminal when the timer fires.
        let manager = self.clone();
        let id = id.to_string();
        let ttl = self.inner.config.terminal_ttl();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut agents = manager.inner.agents.lock().unwrap();
            if let Some(agent) = agents.get(&id) {
                if agent.status().is_terminal() {
                    agents.remove(&id);
                    tracing::debug!(agent_id = %id, "evicted terminal agent after TTL");
                }
            }
        });
    }

    /// Cancel and release every agent. Used by registry teardown.
    pub(crate) fn shutdown_all(&self) {
        let agents: Vec<_> = {
            let mut map = self.inner.agents.lock().unwrap();
            map.drain().map(|(_, a)| a).collect()
        };
        for agent in agents {
            agent.cancel();
            agent.set_status(AgentStatus::Shutdown);
        }
    }
}

/// Build the initial user message from the task and context items.
fn build_task_message(task: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(task.len() + 64);
    out.push_str(task);
    if !context.is_empty() {
        out.push_str("\n\nContext:\n");
        let mut keys: Vec<_> = context.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("- {key}: {}\n", context[key]));
        }
    }
    out
}

/// Prompt for the best-effort introductory preface.
fn preface_prompt(name: &str, task: &str) -> String {
    format!(
        "You are a sub-agent named '{name}' about to start this task:\n{task}\n\n\
         Write one short sentence announcing what you are about to do. \
         Reply with the sentence only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryHistoryLog;
    use crate::sink::NullSink;
    use futures::stream;
    use tokio_util::sync::CancellationToken;

    /// Runner that finishes every turn immediately with no parts.
    struct SilentRunner;

    impl ToolLoopRunner for SilentRunner {
        fn run(
            &self,
            _messages: Vec<AgentMessage>,
            _ctx: SpawnContext,
            _cancel: CancellationToken,
        ) -> futures::stream::BoxStream<'static, RunnerEvent> {
            stream::iter(vec![RunnerEvent::Finished { parts: Vec::new() }]).boxed()
        }
    }

    fn services() -> EngineServices {
        EngineServices {
            runner: Arc::new(SilentRunner),
            history: Arc::new(MemoryHistoryLog::new()),
            supervisor: Arc::new(SupervisionService::new(None).unwrap()),
            bridge: Arc::new(crate::supervision::bridge::ChannelBridge::new()),
            preface_model: None,
            config: EngineConfig::default(),
        }
    }

    fn ctx() -> SpawnContext {
        SpawnContext::new("s1", Arc::new(NullSink))
    }

    #[test]
    fn build_task_message_includes_sorted_context() {
        let mut context = HashMap::new();
        context.insert("priority".to_string(), "high".to_string());
        context.insert("language".to_string(), "Rust".to_string());

        let msg = build_task_message("Fix the build", &context);
        assert!(msg.starts_with("Fix the build"));
        let lang = msg.find("language").unwrap();
        let prio = msg.find("priority").unwrap();
        assert!(lang < prio);
    }

    #[test]
    fn build_task_message_omits_empty_context() {
        let msg = build_task_message("Just do it", &HashMap::new());
        assert_eq!(msg, "Just do it");
    }

    #[tokio::test]
    async fn spawn_rejects_at_concurrency_limit() {
        let manager = AgentManager::new("s1", &services());
        for i in 0..4 {
            manager
                .spawn(&format!("task {i}"), "w", &HashMap::new(), ctx())
                .unwrap();
        }

        let before = manager.inner.agents.lock().unwrap().len();
        let err = manager
            .spawn("one too many", "w", &HashMap::new(), ctx())
            .unwrap_err();
        assert!(err.to_string().starts_with("Max concurrent agents (4) reached"));
        // No agent was allocated.
        assert_eq!(manager.inner.agents.lock().unwrap().len(), before);
    }

    #[tokio::test]
    async fn spawn_rejects_past_max_depth() {
        let manager = AgentManager::new("s1", &services());
        let mut deep = ctx();
        deep.nesting = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let err = manager
            .spawn("too deep", "w", &HashMap::new(), deep)
            .unwrap_err();
        assert!(err.to_string().contains("depth"));
        assert_eq!(manager.inner.agents.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn abort_removes_the_agent_and_returns_partial_output() {
        let manager = AgentManager::new("s1", &services());
        let id = manager.spawn("task", "w", &HashMap::new(), ctx()).unwrap();

        let output = manager.abort(&id);
        assert!(output.is_some());
        assert!(manager.get_agent(&id).is_none());
        assert_eq!(
            manager.statuses_for(&[id]).into_values().next(),
            Some(AgentStatus::NotFound)
        );
    }

    #[tokio::test]
    async fn abort_unknown_agent_returns_none() {
        let manager = AgentManager::new("s1", &services());
        assert!(manager.abort("ghost").is_none());
    }
}
