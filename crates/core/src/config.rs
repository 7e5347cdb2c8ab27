//! The agent's own bootstrap tunables — distinct from `LocalConfig` (§3),
//! which is the user-facing, manifest-adjacent configuration. This is the
//! handful of knobs the agent needs before it even gets to `LocalConfig`:
//! the stuck-deployment timeout and the reachability-probe URL list.
//!
//! Layered with `figment`, defaults under an optional `agent.toml` under
//! environment variables prefixed `SMARTMONITORING_`.

use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::paths::Paths;

fn default_probe_urls() -> Vec<String> {
    vec![
        "https://1.1.1.1".to_string(),
        "https://8.8.8.8".to_string(),
        "https://clients3.google.com/generate_204".to_string(),
    ]
}

fn default_stuck_deployment_timeout_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_stuck_deployment_timeout_secs")]
    pub stuck_deployment_timeout_secs: u64,
    #[serde(default = "default_probe_urls")]
    pub reachability_probe_urls: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stuck_deployment_timeout_secs: default_stuck_deployment_timeout_secs(),
            reachability_probe_urls: default_probe_urls(),
        }
    }
}

impl AgentConfig {
    pub fn stuck_deployment_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_deployment_timeout_secs)
    }

    /// Load from `agent.toml` under `paths`, overridden by
    /// `SMARTMONITORING_*` environment variables, falling back to defaults
    /// when neither is present.
    pub fn load(paths: &Paths) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(AgentConfig::default()))
            .merge(Toml::file(paths.agent_config_file()))
            .merge(Env::prefixed("SMARTMONITORING_"))
            .extract()
    }
}
