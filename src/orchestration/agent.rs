//! One sub-agent's runtime state.
//!
//! A [`ManagedAgent`] bundles everything the manager needs to drive one
//! agent: message history, follow-up input queue, accumulated output, the
//! cancellation token, and the status watch channel observed by `wait`.
//!
//! **Locking model:** mutable state lives behind a `std::sync::Mutex` that is
//! only ever held between await points; the async `exec_lock` is the
//! execution serialization token, guaranteeing at most one cycle body per
//! agent regardless of how many triggers race to schedule one.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::types::{AgentId, AgentSnapshot, AgentStatus, SpawnContext};
use crate::message::{self, AgentMessage, MessagePart};

struct AgentState {
    history: Vec<AgentMessage>,
    input_queue: VecDeque<String>,
    output_text: String,
    last_parts: Vec<MessagePart>,
    cancel: CancellationToken,
    result: Option<String>,
    error: Option<String>,
    preface: Option<String>,
    preface_injected: bool,
    bootstrapped: bool,
    ctx: SpawnContext,
}

pub struct ManagedAgent {
    pub id: AgentId,
    pub name: String,
    pub task: String,
    pub created_at: DateTime<Utc>,
    pub depth: usize,
    pub resumed_from_log: bool,
    state: Mutex<AgentState>,
    /// Execution serialization token: one cycle body at a time.
    pub(crate) exec_lock: tokio::sync::Mutex<()>,
    status_tx: watch::Sender<AgentStatus>,
}

impl ManagedAgent {
    /// Fresh agent created by `spawn`.
    pub(crate) fn new(
        id: AgentId,
        name: String,
        task: String,
        depth: usize,
        initial: Vec<AgentMessage>,
        ctx: SpawnContext,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(AgentStatus::Pending);
        Arc::new(Self {
            id,
            name,
            task,
            created_at: Utc::now(),
            depth,
            resumed_from_log: false,
            state: Mutex::new(AgentState {
                history: initial,
                input_queue: VecDeque::new(),
                output_text: String::new(),
                last_parts: Vec::new(),
                cancel: CancellationToken::new(),
                result: None,
                error: None,
                preface: None,
                preface_injected: false,
                bootstrapped: false,
                ctx,
            }),
            exec_lock: tokio::sync::Mutex::new(()),
            status_tx,
        })
    }

    /// Agent reconstructed from a replayed history log.
    ///
    /// Metadata and messages are already persisted, so the first-run
    /// bootstrap is skipped; the preface (if any) is re-injected on the next
    /// stream since it is never part of the stored history.
    pub(crate) fn rehydrated(
        id: AgentId,
        name: String,
        task: String,
        preface: Option<String>,
        created_at: DateTime<Utc>,
        depth: usize,
        messages: Vec<AgentMessage>,
        ctx: SpawnContext,
    ) -> Arc<Self> {
        let (status_tx, _) = watch::channel(AgentStatus::Pending);
        Arc::new(Self {
            id,
            name,
            task,
            created_at,
            depth,
            resumed_from_log: true,
            state: Mutex::new(AgentState {
                history: messages,
                input_queue: VecDeque::new(),
                output_text: String::new(),
                last_parts: Vec::new(),
                cancel: CancellationToken::new(),
                result: None,
                error: None,
                preface,
                preface_injected: false,
                bootstrapped: true,
                ctx,
            }),
            exec_lock: tokio::sync::Mutex::new(()),
            status_tx,
        })
    }

    // ---- status ----

    pub fn status(&self) -> AgentStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions. The watch channel delivers each
    /// terminal transition exactly once to every live subscriber; publishing
    /// with no subscribers is fine.
    pub fn subscribe(&self) -> watch::Receiver<AgentStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) fn set_status(&self, status: AgentStatus) {
        self.status_tx.send_replace(status);
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        let st = self.state.lock().unwrap();
        AgentSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            task: self.task.clone(),
            status: self.status(),
            result: st.result.clone(),
            error: st.error.clone(),
            depth: self.depth,
            created_at: self.created_at,
            resumed_from_log: self.resumed_from_log,
        }
    }

    pub(crate) fn record_outcome(&self, result: Option<String>, error: Option<String>) {
        let mut st = self.state.lock().unwrap();
        st.result = result;
        st.error = error;
    }

    // ---- context / cancellation ----

    pub(crate) fn context(&self) -> SpawnContext {
        self.state.lock().unwrap().ctx.clone()
    }

    pub(crate) fn update_context(&self, ctx: SpawnContext) {
        self.state.lock().unwrap().ctx = ctx;
    }

    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.state.lock().unwrap().cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.state.lock().unwrap().cancel.cancel();
    }

    /// Cancel the current token and install a fresh one, so a stale
    /// cancellation cannot leak into a later run.
    pub(crate) fn interrupt(&self) {
        let mut st = self.state.lock().unwrap();
        st.cancel.cancel();
        st.cancel = CancellationToken::new();
    }

    // ---- input queue ----

    pub(crate) fn push_input(&self, message: String) {
        self.state.lock().unwrap().input_queue.push_back(message);
    }

    pub(crate) fn pop_input(&self) -> Option<String> {
        self.state.lock().unwrap().input_queue.pop_front()
    }

    // ---- history / output ----

    pub(crate) fn push_history(&self, message: AgentMessage) {
        self.state.lock().unwrap().history.push(message);
    }

    pub fn history(&self) -> Vec<AgentMessage> {
        self.state.lock().unwrap().history.clone()
    }

    /// History in runner-ready form: injects the one-time preface as the
    /// leading system message on its first use.
    pub(crate) fn runner_messages(&self) -> Vec<AgentMessage> {
        let mut st = self.state.lock().unwrap();
        let mut messages = st.history.clone();
        if let Some(preface) = st.preface.clone() {
            if !st.preface_injected {
                messages.insert(0, AgentMessage::system(preface));
                st.preface_injected = true;
            }
        }
        messages
    }

    pub(crate) fn append_output(&self, text: &str) {
        self.state.lock().unwrap().output_text.push_str(text);
    }

    pub fn output_text(&self) -> String {
        self.state.lock().unwrap().output_text.clone()
    }

    pub(crate) fn reset_output(&self) {
        self.state.lock().unwrap().output_text.clear();
    }

    // ---- response parts / approvals ----

    pub(crate) fn set_last_parts(&self, parts: Vec<MessagePart>) {
        self.state.lock().unwrap().last_parts = parts;
    }

    pub(crate) fn pending_approval(&self) -> Option<(String, String, serde_json::Value)> {
        message::find_pending_approval(&self.state.lock().unwrap().last_parts)
    }

    /// Apply an approval decision to the named call, both in the last
    /// response parts and in the owning history message. Returns the updated
    /// message so the caller can re-persist it.
    pub(crate) fn apply_approval(
        &self,
        call_id: &str,
        approved: bool,
        reason: &str,
    ) -> Option<AgentMessage> {
        let mut st = self.state.lock().unwrap();
        message::apply_approval(&mut st.last_parts, call_id, approved, reason);
        for msg in st.history.iter_mut().rev() {
            if message::apply_approval(&mut msg.parts, call_id, approved, reason) {
                return Some(msg.clone());
            }
        }
        None
    }

    // ---- first-run bootstrap / preface ----

    pub(crate) fn bootstrapped(&self) -> bool {
        self.state.lock().unwrap().bootstrapped
    }

    pub(crate) fn mark_bootstrapped(&self) {
        self.state.lock().unwrap().bootstrapped = true;
    }

    pub(crate) fn preface(&self) -> Option<String> {
        self.state.lock().unwrap().preface.clone()
    }

    pub(crate) fn set_preface(&self, text: String) {
        self.state.lock().unwrap().preface = Some(text);
    }
}
