//! `ContainerRuntime`: the narrow capability surface the controller drives.
//!
//! Expressed as a trait so the controller can be exercised in tests against
//! an in-memory fake instead of a real Docker socket.

mod docker;

pub use docker::DockerRuntime;

use std::collections::BTreeMap;

use futures::{StreamExt, stream};

use crate::error::AgentError;
use crate::model::ContainerSpec;
use crate::resolver::ResolvedBindMount;

/// Maximum number of concurrent `stats` calls fanned out over one connection.
const STATS_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Running,
    Stopped,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStats {
    pub name: String,
    pub status: ContainerStatus,
    pub image: Option<String>,
    pub mem_mb: Option<f64>,
    pub cpu_pct: Option<f64>,
}

impl ContainerStats {
    pub fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: ContainerStatus::NotFound,
            image: None,
            mem_mb: None,
            cpu_pct: None,
        }
    }
}

/// A narrow wrapper over the container runtime: pull, create, start, stop,
/// remove, stats, and private-network lifecycle.
pub trait ContainerRuntime {
    /// Create a private, internal bridge network if one by this name doesn't
    /// already exist. Idempotent.
    async fn ensure_network(&self, name: &str) -> Result<(), AgentError>;

    /// Remove the network; missing is not an error.
    async fn remove_network(&self, name: &str) -> Result<(), AgentError>;

    /// Pull every image not already present locally. Aggregates failures.
    async fn pull_all(&self, images: &[String]) -> Result<(), AgentError>;

    /// Remove any existing container with the same name, then create one
    /// with the resolved env/mounts, attach it to the private network.
    /// Does not start it.
    async fn create(
        &self,
        spec: &ContainerSpec,
        env: &BTreeMap<String, String>,
        mounts: &[ResolvedBindMount],
        network: &str,
    ) -> Result<(), AgentError>;

    async fn start(&self, name: &str) -> Result<(), AgentError>;

    /// Missing container is a no-op, not an error.
    async fn stop(&self, name: &str) -> Result<(), AgentError>;

    async fn restart(&self, name: &str) -> Result<(), AgentError>;

    /// Missing container is a no-op, not an error.
    async fn remove(&self, name: &str) -> Result<(), AgentError>;

    /// Best-effort; a missing container yields a `NotFound` record rather
    /// than an error.
    async fn stats(&self, name: &str) -> ContainerStats;

    /// Remove dangling images and unused volumes. Never fails fatally.
    async fn prune(&self);

    async fn start_all(&self, names: &[String]) -> Result<(), AgentError> {
        for name in names {
            self.start(name).await?;
        }
        Ok(())
    }

    async fn stop_all(&self, names: &[String]) -> Result<(), AgentError> {
        for name in names {
            self.stop(name).await?;
        }
        Ok(())
    }

    async fn remove_all(&self, names: &[String]) -> Result<(), AgentError> {
        for name in names {
            self.remove(name).await?;
        }
        Ok(())
    }

    async fn restart_all(&self, names: &[String]) -> Result<(), AgentError> {
        for name in names {
            self.restart(name).await?;
        }
        Ok(())
    }

    /// Bounded fan-out over the single runtime connection, replacing the
    /// one-subprocess-per-container approach the dashboard used to take.
    async fn stats_all(&self, names: &[String]) -> Vec<ContainerStats>
    where
        Self: Sync,
    {
        stream::iter(names)
            .map(|name| self.stats(name))
            .buffer_unordered(STATS_CONCURRENCY)
            .collect()
            .await
    }
}

/// Derive the CPU usage percentage from a pair of Docker stats samples, the
/// way the Docker Engine API's own `docker stats` does: usage-delta over
/// system-delta, scaled by the number of online CPUs.
pub fn cpu_percent(
    cpu_total_usage: u64,
    precpu_total_usage: u64,
    system_cpu_usage: Option<u64>,
    presystem_cpu_usage: Option<u64>,
    online_cpus: u64,
) -> Option<f64> {
    let (system_cpu_usage, presystem_cpu_usage) = (system_cpu_usage?, presystem_cpu_usage?);
    let usage_delta = cpu_total_usage.checked_sub(precpu_total_usage)? as f64;
    let system_delta = system_cpu_usage.checked_sub(presystem_cpu_usage)? as f64;
    if system_delta <= 0.0 || online_cpus == 0 {
        return None;
    }
    Some((usage_delta / system_delta) * online_cpus as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_percent_matches_the_docker_formula() {
        let pct = cpu_percent(200_000_000, 100_000_000, Some(2_000_000_000), Some(1_000_000_000), 4).unwrap();
        assert!((pct - 40.0).abs() < 1e-9);
    }

    #[test]
    fn cpu_percent_is_none_on_a_first_sample() {
        assert!(cpu_percent(100, 0, None, None, 4).is_none());
    }
}
