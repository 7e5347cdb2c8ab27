//! Persists the installed-stack snapshot and the status document atomically.

use std::path::Path;

use chrono::Local;

use crate::error::AgentError;
use crate::model::{DeploymentStatus, InstalledStack, LocalConfig, Status, UpdateChannel, UpdateManifest};
use crate::paths::Paths;
use crate::validate::{validate_local_config, validate_manifest};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Write `contents` to `path` via a temp file in the same directory, then
/// rename over the destination. The rename is atomic on POSIX filesystems,
/// so a crash mid-write never leaves a half-written document behind.
fn atomic_write(path: &Path, contents: &str) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub struct StateStore {
    paths: Paths,
}

impl StateStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn is_deployed(&self) -> bool {
        self.paths.installed_stack_file().exists()
    }

    pub fn save_installed_stack(
        &self,
        config: &LocalConfig,
        manifest: &UpdateManifest,
    ) -> Result<(), AgentError> {
        let stack = InstalledStack {
            manifest: manifest.clone(),
            config: config.clone(),
        };
        let json = serde_json::to_string_pretty(&stack)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("failed to serialize installed stack: {e}")))?;
        atomic_write(&self.paths.installed_stack_file(), &json)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("failed to write installed stack: {e}")))
    }

    pub fn load_installed_stack(&self) -> Result<InstalledStack, AgentError> {
        let path = self.paths.installed_stack_file();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("cannot read {}: {e}", path.display())))?;
        let stack: InstalledStack = serde_json::from_str(&raw)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("malformed installed stack: {e}")))?;
        // Re-validate through the same rules ManifestStore enforces on load,
        // so a hand-edited or corrupted file can't silently resurrect an
        // invalid deployment.
        validate_local_config(&stack.config)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("installed config is invalid: {e}")))?;
        validate_manifest(&stack.manifest)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("installed manifest is invalid: {e}")))?;
        Ok(stack)
    }

    pub fn load_status(&self) -> Result<Status, AgentError> {
        let path = self.paths.status_file();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&raw)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("malformed status document: {e}")))
    }

    /// Merge a status transition over the existing document, if any.
    ///
    /// `last_update` advances only when the new status is `Deployed`;
    /// `deployment_start` is (re)stamped only when the new status is
    /// `Deploying`. Other transitions preserve both timestamps.
    pub fn save_status(
        &self,
        status: DeploymentStatus,
        channel: Option<UpdateChannel>,
        version: Option<&str>,
        error_msg: Option<&str>,
    ) -> Result<(), AgentError> {
        let now = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut doc = self.load_status().unwrap_or(Status {
            status,
            error_msg: None,
            package_version: None,
            update_channel: None,
            last_update: None,
            deployment_start: None,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
        });

        doc.status = status;
        doc.error_msg = error_msg.map(str::to_string);
        if let Some(channel) = channel {
            doc.update_channel = Some(channel);
        }
        if let Some(version) = version {
            doc.package_version = Some(version.to_string());
        }
        match status {
            DeploymentStatus::Deployed => doc.last_update = Some(now),
            DeploymentStatus::Deploying => doc.deployment_start = Some(now),
            DeploymentStatus::DeploymentError => {}
        }

        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("failed to serialize status: {e}")))?;
        atomic_write(&self.paths.status_file(), &json)
            .map_err(|e| AgentError::InstalledStackInvalid(format!("failed to write status: {e}")))
    }

    pub fn clear(&self) -> Result<(), AgentError> {
        for path in [self.paths.installed_stack_file(), self.paths.status_file()] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .map_err(|e| AgentError::InstalledStackInvalid(format!("failed to remove {}: {e}", path.display())))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerEnvConfig, ContainerOverride, ContainerSpec};
    use std::collections::BTreeMap;
    use tempdir::TempDir;

    fn sample_config() -> LocalConfig {
        let mut fields = BTreeMap::new();
        fields.insert("proxy_name".to_string(), "proxy-01".to_string());
        fields.insert("psk_key_file".to_string(), "/etc/smartmonitoring/psk.key".to_string());
        LocalConfig {
            update_channel: UpdateChannel::Stable,
            update_manifest_url: "https://example.com/manifest.yaml".to_string(),
            debug_logging: false,
            log_file_size_mb: 50,
            log_file_count: 3,
            zabbix_proxy_container: ContainerOverride { local_settings: BTreeMap::new(), fields },
            zabbix_mysql_container: None,
            zabbix_agent_container: None,
        }
    }

    fn sample_manifest() -> UpdateManifest {
        UpdateManifest {
            package_version: "1.0.0".to_string(),
            dynamic_secrets: Vec::new(),
            containers: vec![ContainerSpec {
                name: "proxy".to_string(),
                hostname: "proxy".to_string(),
                image: "zabbix/zabbix-proxy:latest".to_string(),
                privileged: false,
                config: ContainerEnvConfig::default(),
                files: None,
                ports: None,
            }],
        }
    }

    #[test]
    fn round_trips_an_installed_stack() {
        let dir = TempDir::new("state-store-test").unwrap();
        let store = StateStore::new(Paths::under(dir.path()));
        store.save_installed_stack(&sample_config(), &sample_manifest()).unwrap();
        assert!(store.is_deployed());
        let loaded = store.load_installed_stack().unwrap();
        assert_eq!(loaded.manifest, sample_manifest());
        assert_eq!(loaded.config, sample_config());
    }

    #[test]
    fn save_status_sets_deployment_start_only_on_deploying() {
        let dir = TempDir::new("state-store-test").unwrap();
        let store = StateStore::new(Paths::under(dir.path()));
        store
            .save_status(DeploymentStatus::Deploying, Some(UpdateChannel::Stable), Some("1.0.0"), None)
            .unwrap();
        let after_deploying = store.load_status().unwrap();
        assert!(after_deploying.deployment_start.is_some());
        assert!(after_deploying.last_update.is_none());

        store
            .save_status(DeploymentStatus::Deployed, Some(UpdateChannel::Stable), Some("1.0.0"), None)
            .unwrap();
        let after_deployed = store.load_status().unwrap();
        assert_eq!(after_deployed.deployment_start, after_deploying.deployment_start);
        assert!(after_deployed.last_update.is_some());
    }

    #[test]
    fn clear_removes_both_files() {
        let dir = TempDir::new("state-store-test").unwrap();
        let store = StateStore::new(Paths::under(dir.path()));
        store.save_installed_stack(&sample_config(), &sample_manifest()).unwrap();
        store.save_status(DeploymentStatus::Deployed, None, None, None).unwrap();
        store.clear().unwrap();
        assert!(!store.is_deployed());
        assert!(store.load_status().is_err());
    }
}
