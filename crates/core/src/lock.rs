//! The deployment lock: an OS-level advisory file lock backing the
//! status-file check, with stuck-deployment takeover.

use std::fs::OpenOptions;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use fs2::FileExt;

use crate::error::AgentError;
use crate::model::{DeploymentStatus, Status};
use crate::paths::Paths;

/// How long a `Deploying` status may sit before it's considered the result
/// of a crashed agent rather than a live transition.
pub const STUCK_DEPLOYMENT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Held for the duration of one controller operation. Drops (and releases
/// the advisory lock) when the operation finishes, whether it succeeded or
/// failed.
pub struct DeploymentLock {
    _file: std::fs::File,
}

impl DeploymentLock {
    /// Acquire the lock, consulting `status` to decide whether a prior
    /// `Deploying` transition is still live or stale.
    ///
    /// Fails fast with `DeploymentInProgress` unless either no status
    /// document exists, the status isn't `Deploying`, or the existing
    /// `deployment_start` is older than `stuck_timeout`.
    pub fn acquire(paths: &Paths, status: Option<&Status>, stuck_timeout: Duration) -> Result<Self, AgentError> {
        if let Some(status) = status
            && status.status == DeploymentStatus::Deploying
            && !Self::is_stale(status, stuck_timeout)
        {
            return Err(AgentError::DeploymentInProgress {
                started_at: status.deployment_start.clone().unwrap_or_default(),
            });
        }

        std::fs::create_dir_all(paths.var_dir())
            .map_err(|e| AgentError::RuntimeUnavailable(format!("cannot create state directory: {e}")))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(paths.status_lock_file())
            .map_err(|e| AgentError::RuntimeUnavailable(format!("cannot open lock file: {e}")))?;

        file.try_lock_exclusive().map_err(|_| AgentError::DeploymentInProgress {
            started_at: status
                .and_then(|s| s.deployment_start.clone())
                .unwrap_or_default(),
        })?;

        Ok(Self { _file: file })
    }

    pub(crate) fn is_stale(status: &Status, stuck_timeout: Duration) -> bool {
        let Some(started_at) = &status.deployment_start else {
            return true;
        };
        let Ok(started_at) = NaiveDateTime::parse_from_str(started_at, TIMESTAMP_FORMAT) else {
            return true;
        };
        let elapsed = Local::now().naive_local().signed_duration_since(started_at);
        elapsed
            .to_std()
            .map(|elapsed| elapsed > stuck_timeout)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempdir::TempDir;

    fn status_with_start(offset: ChronoDuration) -> Status {
        let start = (Local::now() - offset).format(TIMESTAMP_FORMAT).to_string();
        Status {
            status: DeploymentStatus::Deploying,
            error_msg: None,
            package_version: None,
            update_channel: None,
            last_update: None,
            deployment_start: Some(start),
            agent_version: "0.1.0".to_string(),
        }
    }

    #[test]
    fn a_fresh_deploying_status_blocks_a_new_operation() {
        let dir = TempDir::new("lock-test").unwrap();
        let paths = Paths::under(dir.path());
        let status = status_with_start(ChronoDuration::seconds(5));
        let result = DeploymentLock::acquire(&paths, Some(&status), STUCK_DEPLOYMENT_TIMEOUT);
        assert!(matches!(result, Err(AgentError::DeploymentInProgress { .. })));
    }

    #[test]
    fn a_stale_deploying_status_is_taken_over() {
        let dir = TempDir::new("lock-test").unwrap();
        let paths = Paths::under(dir.path());
        let status = status_with_start(ChronoDuration::minutes(45));
        let result = DeploymentLock::acquire(&paths, Some(&status), STUCK_DEPLOYMENT_TIMEOUT);
        assert!(result.is_ok());
    }

    #[test]
    fn no_status_document_acquires_cleanly() {
        let dir = TempDir::new("lock-test").unwrap();
        let paths = Paths::under(dir.path());
        assert!(DeploymentLock::acquire(&paths, None, STUCK_DEPLOYMENT_TIMEOUT).is_ok());
    }
}
