//! Loads and validates the host's local config and the remote manifest.

use crate::error::AgentError;
use crate::model::{LocalConfig, ManifestDocument, UpdateChannel, UpdateManifest};
use crate::paths::Paths;
use crate::validate::{validate_local_config, validate_manifest};

pub struct ManifestStore {
    paths: Paths,
    http: reqwest::Client,
}

impl ManifestStore {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            http: reqwest::Client::new(),
        }
    }

    /// Load and validate the host's local configuration file.
    pub fn load_local_config(&self) -> Result<LocalConfig, AgentError> {
        let path = self.paths.local_config_file();
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| AgentError::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        self.parse_local_config(&raw)
    }

    /// Parse+validate a local config document without touching the filesystem.
    /// Exposed for the `validate-config` CLI verb and for tests.
    pub fn parse_local_config(&self, raw: &str) -> Result<LocalConfig, AgentError> {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            #[serde(rename = "SmartMonitoring_Proxy")]
            smart_monitoring_proxy: LocalConfig,
        }
        let wrapper: Wrapper = serde_yaml::from_str(raw)
            .map_err(|e| AgentError::ConfigError(format!("invalid YAML: {e}")))?;
        let config = wrapper.smart_monitoring_proxy;
        validate_local_config(&config).map_err(|e| AgentError::ConfigError(e.0))?;
        Ok(config)
    }

    /// Fetch the remote manifest and select the given channel.
    pub async fn fetch_manifest(
        &self,
        url: &str,
        channel: UpdateChannel,
    ) -> Result<UpdateManifest, AgentError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::ManifestError(format!("failed to fetch manifest from {url}: {e}")))?;
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::ManifestError(format!("failed to read manifest body: {e}")))?;
        self.parse_manifest(&body, channel)
    }

    /// Parse+validate a manifest document and select one channel. Exposed for
    /// `validate-config` and for tests.
    pub fn parse_manifest(
        &self,
        raw: &str,
        channel: UpdateChannel,
    ) -> Result<UpdateManifest, AgentError> {
        let document: ManifestDocument = serde_yaml::from_str(raw)
            .map_err(|e| AgentError::ManifestError(format!("invalid manifest YAML: {e}")))?;
        let key = channel.to_string();
        let manifest = document
            .versions
            .get(&key)
            .ok_or_else(|| AgentError::ManifestError(format!("manifest has no '{key}' channel")))?
            .clone();
        validate_manifest(&manifest).map_err(|e| AgentError::ManifestError(e.0))?;
        Ok(manifest)
    }
}
