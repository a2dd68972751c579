//! Sub-agent orchestration engine.
//!
//! [`manager::AgentManager`] drives one session's agents;
//! [`registry::SessionAgentRegistry`] maps session ids to managers and owns
//! their lifecycle. [`EngineServices`] bundles the injected collaborators so
//! there is exactly one place the engine's dependencies are wired up -- no
//! process-global state.

pub mod agent;
pub mod manager;
pub mod registry;
pub mod types;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::history::HistoryLog;
use crate::runner::{TextModel, ToolLoopRunner};
use crate::supervision::bridge::ApprovalBridge;
use crate::supervision::gate::SupervisionService;

/// The engine's injected collaborators, shared by every manager.
#[derive(Clone)]
pub struct EngineServices {
    pub runner: Arc<dyn ToolLoopRunner>,
    pub history: Arc<dyn HistoryLog>,
    pub supervisor: Arc<SupervisionService>,
    pub bridge: Arc<dyn ApprovalBridge>,
    /// Optional model for best-effort preface generation.
    pub preface_model: Option<Arc<dyn TextModel>>,
    pub config: EngineConfig,
}
