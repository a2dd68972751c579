//! Session registry: maps session ids to agent managers.
//!
//! Managers are created lazily on first access and evicted by a periodic
//! sweep once idle past the configured threshold. The registry is an owned
//! service object: construct it once, inject it where needed, and call
//! [`SessionAgentRegistry::shutdown`] (or drop it) to stop the sweep task
//! and tear every session down. The sweep task holds only a `Weak` handle
//! so dropping the registry actually ends it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::manager::AgentManager;
use super::EngineServices;

struct SessionEntry {
    manager: AgentManager,
    last_access: Instant,
}

pub struct SessionAgentRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    services: EngineServices,
    sweep_cancel: CancellationToken,
}

impl SessionAgentRegistry {
    /// Create the registry and start its background idle sweep.
    pub fn new(services: EngineServices) -> Arc<Self> {
        let registry = Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            services,
            sweep_cancel: CancellationToken::new(),
        });

        let weak = Arc::downgrade(&registry);
        let cancel = registry.sweep_cancel.clone();
        let interval = registry.services.config.registry_sweep_interval();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(registry) = weak.upgrade() else { break };
                        registry.sweep();
                    }
                }
            }
        });

        registry
    }

    /// Manager for a session, created lazily. Refreshes the idle clock.
    pub fn get(&self, session_id: &str) -> AgentManager {
        let mut sessions = self.sessions.lock().unwrap();
        let entry = sessions.entry(session_id.to_string()).or_insert_with(|| {
            tracing::info!(session_id, "created agent manager for session");
            SessionEntry {
                manager: AgentManager::new(session_id, &self.services),
                last_access: Instant::now(),
            }
        });
        entry.last_access = Instant::now();
        entry.manager.clone()
    }

    /// Tear down one session explicitly: release all its agents and evict
    /// the manager.
    pub fn remove(&self, session_id: &str) {
        let entry = self.sessions.lock().unwrap().remove(session_id);
        if let Some(entry) = entry {
            entry.manager.shutdown_all();
            tracing::info!(session_id, "removed session");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Evict every manager idle past the threshold.
    fn sweep(&self) {
        let idle_timeout = self.services.config.session_idle_timeout();
        let expired: Vec<(String, AgentManager)> = {
            let mut sessions = self.sessions.lock().unwrap();
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, e)| e.last_access.elapsed() > idle_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|e| (id, e.manager)))
                .collect()
        };

        for (session_id, manager) in expired {
            manager.shutdown_all();
            tracing::info!(session_id = %session_id, "evicted idle session");
        }
    }

    /// Stop the sweep task and tear down every session.
    pub fn shutdown(&self) {
        self.sweep_cancel.cancel();
        let entries: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().unwrap();
            sessions.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            entry.manager.shutdown_all();
        }
    }
}

impl Drop for SessionAgentRegistry {
    fn drop(&mut self) {
        self.sweep_cancel.cancel();
    }
}
