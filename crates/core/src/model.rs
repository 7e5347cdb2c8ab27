//! Wire-shape data model: local config, remote manifest, persisted state.
//!
//! These are plain `serde`-derived records. Validation (cross-field checks,
//! numeric ranges, required-override enforcement) is a separate pass in
//! [`crate::validate`] — parsing never fails on anything `serde` itself
//! wouldn't already reject.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum UpdateChannel {
    #[default]
    #[serde(rename = "STABLE")]
    #[strum(serialize = "STABLE")]
    Stable,
    #[serde(rename = "TESTING")]
    #[strum(serialize = "TESTING")]
    Testing,
}

fn default_log_file_size_mb() -> u32 {
    50
}

fn default_log_file_count() -> u32 {
    3
}

/// A single per-container override section inside `LocalConfig`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerOverride {
    #[serde(default)]
    pub local_settings: BTreeMap<String, String>,
    /// Container-specific typed fields that don't fit `local_settings`
    /// (e.g. `proxy_name`, `psk_key_file`, `smartmonitoring_status_file`).
    #[serde(flatten)]
    pub fields: BTreeMap<String, String>,
}

impl ContainerOverride {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// The host's declared intent, read from `smartmonitoring_config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub update_channel: UpdateChannel,
    pub update_manifest_url: String,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(default = "default_log_file_size_mb")]
    pub log_file_size_mb: u32,
    #[serde(default = "default_log_file_count")]
    pub log_file_count: u32,
    pub zabbix_proxy_container: ContainerOverride,
    #[serde(default)]
    pub zabbix_mysql_container: Option<ContainerOverride>,
    #[serde(default)]
    pub zabbix_agent_container: Option<ContainerOverride>,
}

impl LocalConfig {
    /// Look up the override section for a container by name, if the host
    /// declared one. `zabbix_proxy_container` is always present; the rest are
    /// optional.
    pub fn override_for(&self, container_name: &str) -> Option<&ContainerOverride> {
        match container_name {
            "zabbix_proxy_container" => Some(&self.zabbix_proxy_container),
            "zabbix_mysql_container" => self.zabbix_mysql_container.as_ref(),
            "zabbix_agent_container" => self.zabbix_agent_container.as_ref(),
            _ => None,
        }
    }
}

/// Env-var composition rules for one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerEnvConfig {
    #[serde(default)]
    pub r#static: BTreeMap<String, String>,
    #[serde(default)]
    pub dynamic: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum PortProtocol {
    #[serde(rename = "tcp")]
    #[strum(serialize = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    #[strum(serialize = "udp")]
    Udp,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
    pub protocol: PortProtocol,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MappedFile {
    pub name: String,
    pub host_path: String,
    pub host_path_dynamic: bool,
    pub container_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub hostname: String,
    pub image: String,
    pub privileged: bool,
    pub config: ContainerEnvConfig,
    #[serde(default)]
    pub files: Option<Vec<MappedFile>>,
    #[serde(default)]
    pub ports: Option<Vec<PortBinding>>,
}

/// The channel-specific desired state for one package version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateManifest {
    pub package_version: String,
    #[serde(default)]
    pub dynamic_secrets: Vec<String>,
    pub containers: Vec<ContainerSpec>,
}

impl UpdateManifest {
    pub fn version(&self) -> Result<semver::Version, semver::Error> {
        semver::Version::parse(&self.package_version)
    }

    pub fn container(&self, name: &str) -> Option<&ContainerSpec> {
        self.containers.iter().find(|c| c.name == name)
    }
}

/// Top-level document fetched from the manifest URL: one `UpdateManifest` per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestDocument {
    pub versions: BTreeMap<String, UpdateManifest>,
}

/// The persisted record of what is currently deployed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledStack {
    pub manifest: UpdateManifest,
    pub config: LocalConfig,
}

// `LocalConfig` needs manual `PartialEq`/`Eq` because floats aren't involved but
// derive requires every field to implement it; all fields here already do.
impl PartialEq for LocalConfig {
    fn eq(&self, other: &Self) -> bool {
        self.update_channel == other.update_channel
            && self.update_manifest_url == other.update_manifest_url
            && self.debug_logging == other.debug_logging
            && self.log_file_size_mb == other.log_file_size_mb
            && self.log_file_count == other.log_file_count
            && self.zabbix_proxy_container == other.zabbix_proxy_container
            && self.zabbix_mysql_container == other.zabbix_mysql_container
            && self.zabbix_agent_container == other.zabbix_agent_container
    }
}
impl Eq for LocalConfig {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString)]
pub enum DeploymentStatus {
    Deploying,
    Deployed,
    DeploymentError,
}

/// The deployment state document, `status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub status: DeploymentStatus,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default)]
    pub package_version: Option<String>,
    #[serde(default)]
    pub update_channel: Option<UpdateChannel>,
    #[serde(default)]
    pub last_update: Option<String>,
    #[serde(default)]
    pub deployment_start: Option<String>,
    pub agent_version: String,
}
