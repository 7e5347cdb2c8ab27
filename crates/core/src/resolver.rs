//! Composes per-container environment and bind-mount sets from the manifest,
//! the local config, and the minted secrets table. Pure function of its
//! inputs — no filesystem or runtime effects beyond checking that declared
//! bind-mount sources exist.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::AgentError;
use crate::model::{ContainerSpec, LocalConfig, MappedFile};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBindMount {
    pub host_path: String,
    pub container_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedContainer {
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<ResolvedBindMount>,
}

pub struct Resolver;

impl Resolver {
    /// Resolve one container's environment and bind mounts.
    ///
    /// Overlay order for the env map: `static < local_settings < secrets <
    /// dynamic`. Later layers overwrite earlier ones on a name collision.
    pub fn resolve(
        config: &LocalConfig,
        spec: &ContainerSpec,
        minted_secrets: &BTreeMap<String, String>,
    ) -> Result<ResolvedContainer, AgentError> {
        let env = Self::resolve_env(config, spec, minted_secrets)?;
        let mounts = Self::resolve_mounts(config, spec)?;
        Ok(ResolvedContainer { env, mounts })
    }

    fn resolve_env(
        config: &LocalConfig,
        spec: &ContainerSpec,
        minted_secrets: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, AgentError> {
        let mut env = spec.config.r#static.clone();

        let override_section = config.override_for(&spec.name);

        if let Some(section) = override_section {
            for (key, value) in &section.local_settings {
                env.insert(key.clone(), value.clone());
            }
        }

        for (env_name, secret_name) in &spec.config.secrets {
            let value = minted_secrets.get(secret_name).ok_or_else(|| {
                AgentError::ManifestError(format!(
                    "container '{}' references secret '{}' which was not minted",
                    spec.name, secret_name
                ))
            })?;
            env.insert(env_name.clone(), value.clone());
        }

        if !spec.config.dynamic.is_empty() {
            let section = override_section.ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "container '{}' requires dynamic values but the host has no override section for it",
                    spec.name
                ))
            })?;
            let mut assigned_by_dynamic = std::collections::BTreeSet::new();
            for (env_name, local_config_key) in &spec.config.dynamic {
                if !assigned_by_dynamic.insert(env_name) {
                    return Err(AgentError::ManifestError(format!(
                        "container '{}' assigns env var '{}' twice in config.dynamic",
                        spec.name, env_name
                    )));
                }
                let value = section.local_settings.get(local_config_key).ok_or_else(|| {
                    AgentError::ConfigError(format!(
                        "container '{}' needs local_settings.{} but it is not set in the override",
                        spec.name, local_config_key
                    ))
                })?;
                env.insert(env_name.clone(), value.clone());
            }
        }

        Ok(env)
    }

    fn resolve_mounts(
        config: &LocalConfig,
        spec: &ContainerSpec,
    ) -> Result<Vec<ResolvedBindMount>, AgentError> {
        let Some(files) = &spec.files else {
            return Ok(Vec::new());
        };

        let mut mounts = Vec::with_capacity(files.len());
        for file in files {
            let host_path = Self::resolve_host_path(config, spec, file)?;
            mounts.push(ResolvedBindMount {
                host_path,
                container_path: file.container_path.clone(),
            });
        }
        Ok(mounts)
    }

    fn resolve_host_path(
        config: &LocalConfig,
        spec: &ContainerSpec,
        file: &MappedFile,
    ) -> Result<String, AgentError> {
        let host_path = if file.host_path_dynamic {
            let section = config.override_for(&spec.name).ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "container '{}' has a dynamic mapped file '{}' but the host has no override section for it",
                    spec.name, file.name
                ))
            })?;
            let resolved = section.local_settings.get(&file.host_path).ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "container '{}' file '{}' needs local_settings.{} but it is not set in the override",
                    spec.name, file.name, file.host_path
                ))
            })?;
            if !Path::new(resolved).exists() {
                return Err(AgentError::ConfigError(format!(
                    "container '{}' file '{}' resolves to '{}' which does not exist on the host",
                    spec.name, file.name, resolved
                )));
            }
            resolved.clone()
        } else {
            if !Path::new(&file.host_path).exists() {
                return Err(AgentError::ManifestError(format!(
                    "container '{}' file '{}' host_path '{}' does not exist on the host",
                    spec.name, file.name, file.host_path
                )));
            }
            file.host_path.clone()
        };
        Ok(host_path)
    }
}
