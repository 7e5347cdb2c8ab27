//! The typed error taxonomy components raise; the controller matches on these
//! to decide status transitions instead of catching a broad exception type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("local configuration is invalid: {0}")]
    ConfigError(String),

    #[error("manifest is invalid: {0}")]
    ManifestError(String),

    #[error("persisted deployment state is corrupt: {0}")]
    InstalledStackInvalid(String),

    #[error("one or more images could not be pulled: {missing:?}")]
    ImagesUnavailable { missing: Vec<String> },

    #[error("failed to create container '{name}': {source}")]
    ContainerCreateError {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("another deployment is already in progress (started at {started_at})")]
    DeploymentInProgress { started_at: String },
}

pub type AgentResult<T> = Result<T, AgentError>;
