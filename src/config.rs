//! Engine configuration.
//!
//! Limits and timeouts for the orchestration engine, loadable from a TOML
//! file. A missing file degrades to defaults; a malformed file is a typed
//! error so the host can surface it instead of silently running with
//! defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Fully-resolved engine configuration. All fields have values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Maximum agents in non-terminal states per manager.
    pub max_concurrent_agents: usize,
    /// Maximum nesting depth for agent-spawned agents (root spawn = depth 0).
    pub max_spawn_depth: usize,
    /// How long a terminal agent stays resident before memory eviction.
    pub terminal_ttl_secs: u64,
    /// Interval between registry idle sweeps.
    pub registry_sweep_interval_secs: u64,
    /// A session manager untouched for this long is shut down and evicted.
    pub session_idle_timeout_secs: u64,
    /// Bounded wait for a human decision on an escalated tool call.
    pub approval_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 4,
            max_spawn_depth: 3,
            terminal_ttl_secs: 300,
            registry_sweep_interval_secs: 60,
            session_idle_timeout_secs: 1800,
            approval_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields defaults (logged at debug). Read or parse
    /// failures are returned as [`ConfigError`].
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::IoError(e)),
        };

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn terminal_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_ttl_secs)
    }

    pub fn registry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.registry_sweep_interval_secs)
    }

    pub fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }
}
