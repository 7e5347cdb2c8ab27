//! Cross-field schema checks, run as a pass separate from parsing.
//!
//! `serde` already enforces the shape (required fields, types); what's left
//! here are the range and cross-reference rules a derive can't express:
//! log-size bounds, port ranges, and the mandatory `zabbix_proxy_container`
//! fields.

use crate::model::{ContainerSpec, LocalConfig, UpdateManifest};

/// A single validation failure, with a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type ValidationResult = Result<(), ValidationError>;

fn fail(message: impl Into<String>) -> ValidationResult {
    Err(ValidationError(message.into()))
}

/// Validate a parsed `LocalConfig` against the fixed schema (§4.1).
pub fn validate_local_config(config: &LocalConfig) -> ValidationResult {
    if !(10..=1000).contains(&config.log_file_size_mb) {
        return fail(format!(
            "log_file_size_mb must be between 10 and 1000, got {}",
            config.log_file_size_mb
        ));
    }
    if !(1..=10).contains(&config.log_file_count) {
        return fail(format!(
            "log_file_count must be between 1 and 10, got {}",
            config.log_file_count
        ));
    }
    if config.update_manifest_url.trim().is_empty() {
        return fail("update_manifest_url must not be empty");
    }

    let proxy = &config.zabbix_proxy_container;
    if proxy.field("proxy_name").is_none() {
        return fail("zabbix_proxy_container.proxy_name is required");
    }
    if proxy.field("psk_key_file").is_none() {
        return fail("zabbix_proxy_container.psk_key_file is required");
    }

    if let Some(agent) = &config.zabbix_agent_container
        && agent.field("smartmonitoring_status_file").is_none()
    {
        return fail("zabbix_agent_container.smartmonitoring_status_file is required when the section is present");
    }

    Ok(())
}

/// Validate one [`ContainerSpec`] against the port/field rules in §3.
fn validate_container_spec(spec: &ContainerSpec) -> ValidationResult {
    if spec.name.trim().is_empty() {
        return fail("container name must not be empty");
    }
    if spec.image.trim().is_empty() {
        return fail(format!("container '{}' has an empty image", spec.name));
    }
    if let Some(ports) = &spec.ports {
        for port in ports {
            if port.host_port == 0 {
                return fail(format!(
                    "container '{}' has an invalid host_port 0",
                    spec.name
                ));
            }
            if port.container_port == 0 {
                return fail(format!(
                    "container '{}' has an invalid container_port 0",
                    spec.name
                ));
            }
        }
    }
    Ok(())
}

/// Validate a parsed [`UpdateManifest`] against the fixed schema (§4.1).
pub fn validate_manifest(manifest: &UpdateManifest) -> ValidationResult {
    if manifest.package_version.trim().is_empty() {
        return fail("package_version must not be empty");
    }
    if semver::Version::parse(&manifest.package_version).is_err() {
        return fail(format!(
            "package_version '{}' is not a valid semantic version",
            manifest.package_version
        ));
    }
    if manifest.containers.is_empty() {
        return fail("manifest must declare at least one container");
    }
    let mut seen_secret_names = std::collections::BTreeSet::new();
    for name in &manifest.dynamic_secrets {
        if !seen_secret_names.insert(name) {
            return fail(format!("dynamic_secrets declares '{name}' more than once"));
        }
    }
    for spec in &manifest.containers {
        validate_container_spec(spec)?;
        for secret_name in spec.config.secrets.values() {
            if !manifest.dynamic_secrets.contains(secret_name) {
                return fail(format!(
                    "container '{}' references secret '{}' not declared in dynamic_secrets",
                    spec.name, secret_name
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ContainerEnvConfig, ContainerOverride};
    use std::collections::BTreeMap;

    fn valid_local_config() -> LocalConfig {
        let mut proxy_fields = BTreeMap::new();
        proxy_fields.insert("proxy_name".to_string(), "proxy-01".to_string());
        proxy_fields.insert("psk_key_file".to_string(), "/etc/smartmonitoring/psk.key".to_string());
        LocalConfig {
            update_channel: Default::default(),
            update_manifest_url: "https://example.com/manifest.yaml".to_string(),
            debug_logging: false,
            log_file_size_mb: 50,
            log_file_count: 3,
            zabbix_proxy_container: ContainerOverride { local_settings: BTreeMap::new(), fields: proxy_fields },
            zabbix_mysql_container: None,
            zabbix_agent_container: None,
        }
    }

    #[test]
    fn accepts_a_minimal_valid_config() {
        assert!(validate_local_config(&valid_local_config()).is_ok());
    }

    #[test]
    fn rejects_log_size_outside_range() {
        let mut config = valid_local_config();
        config.log_file_size_mb = 5;
        assert!(validate_local_config(&config).is_err());
    }

    #[test]
    fn rejects_missing_proxy_name() {
        let mut config = valid_local_config();
        config.zabbix_proxy_container.fields.remove("proxy_name");
        assert!(validate_local_config(&config).is_err());
    }

    fn manifest_with_one_container() -> UpdateManifest {
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
    fn rejects_non_semver_package_version() {
        let mut manifest = manifest_with_one_container();
        manifest.package_version = "not-a-version".to_string();
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn rejects_secret_not_declared_in_dynamic_secrets() {
        let mut manifest = manifest_with_one_container();
        manifest.containers[0]
            .config
            .secrets
            .insert("PSK".to_string(), "proxy_psk".to_string());
        assert!(validate_manifest(&manifest).is_err());
    }

    #[test]
    fn accepts_secret_declared_in_dynamic_secrets() {
        let mut manifest = manifest_with_one_container();
        manifest.dynamic_secrets.push("proxy_psk".to_string());
        manifest.containers[0]
            .config
            .secrets
            .insert("PSK".to_string(), "proxy_psk".to_string());
        assert!(validate_manifest(&manifest).is_ok());
    }

    #[test]
    fn rejects_duplicate_dynamic_secret_names() {
        let mut manifest = manifest_with_one_container();
        manifest.dynamic_secrets.push("proxy_psk".to_string());
        manifest.dynamic_secrets.push("proxy_psk".to_string());
        assert!(validate_manifest(&manifest).is_err());
    }
}
