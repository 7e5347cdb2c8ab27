//! Filesystem roots the agent reads and writes through.
//!
//! The production layout is fixed (`/etc`, `/var`, `/var/log`), but baking those
//! roots into every constructor makes the rest of the crate untestable without
//! environment tricks. `Paths` is passed explicitly instead.

use std::path::{Path, PathBuf};

/// Resolved filesystem roots for one agent instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    etc_dir: PathBuf,
    var_dir: PathBuf,
    log_dir: PathBuf,
}

const LOCAL_CONFIG_FILE_NAME: &str = "smartmonitoring_config.yaml";
const INSTALLED_STACK_FILE_NAME: &str = "installed_stack.json";
const STATUS_FILE_NAME: &str = "status.json";
const STATUS_LOCK_FILE_NAME: &str = "status.lock";
const AGENT_CONFIG_FILE_NAME: &str = "agent.toml";

impl Paths {
    /// The fixed production layout on a POSIX host.
    pub fn production() -> Self {
        Self {
            etc_dir: PathBuf::from("/etc/smartmonitoring"),
            var_dir: PathBuf::from("/var/smartmonitoring"),
            log_dir: PathBuf::from("/var/log/smartmonitoring"),
        }
    }

    /// A layout rooted under `root`, for tests (and any non-production install).
    pub fn under(root: &Path) -> Self {
        Self {
            etc_dir: root.join("etc/smartmonitoring"),
            var_dir: root.join("var/smartmonitoring"),
            log_dir: root.join("var/log/smartmonitoring"),
        }
    }

    pub fn local_config_file(&self) -> PathBuf {
        self.etc_dir.join(LOCAL_CONFIG_FILE_NAME)
    }

    pub fn agent_config_file(&self) -> PathBuf {
        self.etc_dir.join(AGENT_CONFIG_FILE_NAME)
    }

    pub fn installed_stack_file(&self) -> PathBuf {
        self.var_dir.join(INSTALLED_STACK_FILE_NAME)
    }

    pub fn status_file(&self) -> PathBuf {
        self.var_dir.join(STATUS_FILE_NAME)
    }

    pub fn status_lock_file(&self) -> PathBuf {
        self.var_dir.join(STATUS_LOCK_FILE_NAME)
    }

    pub fn var_dir(&self) -> &Path {
        &self.var_dir
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}
