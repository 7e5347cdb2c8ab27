//! Bollard-backed implementation of [`ContainerRuntime`] against the local
//! Docker Engine API over its UNIX socket.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, RestartContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::network::{ConnectNetworkOptions, CreateNetworkOptions};
use bollard::secret::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use derive_more::Deref;
use futures::StreamExt;

use super::{ContainerRuntime, ContainerStats, ContainerStatus, cpu_percent};
use crate::error::AgentError;
use crate::model::{ContainerSpec, PortProtocol};
use crate::resolver::ResolvedBindMount;

const CONNECT_ATTEMPTS: usize = 3;
const CONNECT_BACKOFF: Duration = Duration::from_secs(10);
/// JSON file log driver cap per the manifest's logging contract (§4.5).
const LOG_MAX_SIZE: &str = "500m";

#[derive(Deref)]
pub struct DockerRuntime {
    #[deref]
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon, retrying up to three times with a
    /// 10s backoff between attempts.
    pub async fn connect() -> Result<Self, AgentError> {
        let connect = || async { Docker::connect_with_local_defaults() };
        let backoff = ConstantBuilder::default()
            .with_delay(CONNECT_BACKOFF)
            .with_max_times(CONNECT_ATTEMPTS - 1);
        let docker = connect
            .retry(&backoff)
            .await
            .map_err(|e| AgentError::RuntimeUnavailable(e.to_string()))?;

        docker
            .ping()
            .await
            .map_err(|e| AgentError::RuntimeUnavailable(e.to_string()))?;

        Ok(Self { docker })
    }

    fn build_container_config(
        spec: &ContainerSpec,
        env: &BTreeMap<String, String>,
        mounts: &[ResolvedBindMount],
    ) -> Config<String> {
        let env: Vec<String> = env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let binds: Vec<String> = mounts
            .iter()
            .map(|m| format!("{}:{}", m.host_path, m.container_path))
            .collect();

        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        let mut exposed_ports: HashMap<String, HashMap<(), ()>> = HashMap::new();
        if let Some(ports) = &spec.ports {
            for port in ports {
                let proto = match port.protocol {
                    PortProtocol::Tcp => "tcp",
                    PortProtocol::Udp => "udp",
                };
                let key = format!("{}/{}", port.container_port, proto);
                exposed_ports.entry(key.clone()).or_default();
                port_bindings.insert(
                    key,
                    Some(vec![PortBinding {
                        host_ip: Some("0.0.0.0".to_string()),
                        host_port: Some(port.host_port.to_string()),
                    }]),
                );
            }
        }

        let mut log_config_opts = HashMap::new();
        log_config_opts.insert("max-size".to_string(), LOG_MAX_SIZE.to_string());
        let log_config = bollard::secret::HostConfigLogConfig {
            typ: Some("json-file".to_string()),
            config: Some(log_config_opts),
        };

        let host_config = HostConfig {
            binds: (!binds.is_empty()).then_some(binds),
            port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
            privileged: Some(spec.privileged),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            log_config: Some(log_config),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            hostname: Some(spec.hostname.clone()),
            env: (!env.is_empty()).then_some(env),
            exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    async fn ensure_network(&self, name: &str) -> Result<(), AgentError> {
        if self.docker.inspect_network::<String>(name, None).await.is_ok() {
            return Ok(());
        }
        self.docker
            .create_network(CreateNetworkOptions {
                name: name.to_string(),
                check_duplicate: true,
                driver: "bridge".to_string(),
                internal: true,
                ..Default::default()
            })
            .await
            .map_err(|e| AgentError::RuntimeUnavailable(format!("failed to create network '{name}': {e}")))?;
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), AgentError> {
        self.docker.remove_network(name).await.ok();
        Ok(())
    }

    async fn pull_all(&self, images: &[String]) -> Result<(), AgentError> {
        let mut missing = Vec::new();
        for image in images {
            if self.docker.inspect_image(image).await.is_ok() {
                continue;
            }
            let (from_image, tag) = image.split_once(':').unwrap_or((image.as_str(), "latest"));
            let mut stream = self.docker.create_image(
                Some(bollard::image::CreateImageOptions {
                    from_image: from_image.to_string(),
                    tag: tag.to_string(),
                    ..Default::default()
                }),
                None,
                None,
            );
            let mut failed = false;
            while let Some(result) = stream.next().await {
                if result.is_err() {
                    failed = true;
                    break;
                }
            }
            if failed {
                missing.push(image.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AgentError::ImagesUnavailable { missing })
        }
    }

    async fn create(
        &self,
        spec: &ContainerSpec,
        env: &BTreeMap<String, String>,
        mounts: &[ResolvedBindMount],
        network: &str,
    ) -> Result<(), AgentError> {
        self.remove(&spec.name).await?;

        let config = Self::build_container_config(spec, env, mounts);
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.as_str(),
                    ..Default::default()
                }),
                config,
            )
            .await
            .map_err(|e| AgentError::ContainerCreateError {
                name: spec.name.clone(),
                source: anyhow::anyhow!(e),
            })?;

        self.docker
            .connect_network(
                network,
                ConnectNetworkOptions {
                    container: spec.name.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| AgentError::ContainerCreateError {
                name: spec.name.clone(),
                source: anyhow::anyhow!(e),
            })?;

        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), AgentError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| AgentError::ContainerCreateError {
                name: name.to_string(),
                source: anyhow::anyhow!(e),
            })
    }

    async fn stop(&self, name: &str) -> Result<(), AgentError> {
        self.docker
            .stop_container(name, Some(StopContainerOptions { t: 10 }))
            .await
            .ok();
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), AgentError> {
        self.docker
            .restart_container(name, Some(RestartContainerOptions { t: 10 }))
            .await
            .map_err(|e| AgentError::RuntimeUnavailable(format!("failed to restart '{name}': {e}")))
    }

    async fn remove(&self, name: &str) -> Result<(), AgentError> {
        self.stop(name).await.ok();
        self.docker
            .remove_container(name, Some(RemoveContainerOptions { force: true, ..Default::default() }))
            .await
            .ok();
        Ok(())
    }

    async fn stats(&self, name: &str) -> ContainerStats {
        let Ok(inspect) = self.docker.inspect_container(name, None).await else {
            return ContainerStats::not_found(name);
        };
        let status = match inspect.state.as_ref().and_then(|s| s.running) {
            Some(true) => ContainerStatus::Running,
            _ => ContainerStatus::Stopped,
        };
        let image = inspect.config.as_ref().and_then(|c| c.image.clone());

        let mut stats_stream = self.docker.stats(
            name,
            Some(bollard::container::StatsOptions { stream: false, one_shot: true }),
        );
        let Some(Ok(sample)) = stats_stream.next().await else {
            return ContainerStats { name: name.to_string(), status, image, mem_mb: None, cpu_pct: None };
        };

        let mem_mb = sample.memory_stats.usage.map(|u| u as f64 / 1024.0 / 1024.0);
        let cpu_pct = cpu_percent(
            sample.cpu_stats.cpu_usage.total_usage,
            sample.precpu_stats.cpu_usage.total_usage,
            sample.cpu_stats.system_cpu_usage,
            sample.precpu_stats.system_cpu_usage,
            sample.cpu_stats.online_cpus.unwrap_or(1),
        );

        ContainerStats { name: name.to_string(), status, image, mem_mb, cpu_pct }
    }

    async fn prune(&self) {
        self.docker.prune_images(None::<bollard::image::PruneImagesOptions<String>>).await.ok();
        self.docker.prune_volumes(None::<bollard::volume::PruneVolumesOptions<String>>).await.ok();
    }
}
