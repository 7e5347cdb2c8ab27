//! `DeploymentController` — the core state machine. Orchestrates
//! install/replace/uninstall/restart with lock, rollback, and status
//! transitions.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::lock::DeploymentLock;
use crate::manifest_store::ManifestStore;
use crate::model::{ContainerSpec, DeploymentStatus, LocalConfig, UpdateManifest};
use crate::paths::Paths;
use crate::reachability::ReachabilityProbe;
use crate::resolver::{ResolvedContainer, Resolver};
use crate::runtime::ContainerRuntime;
use crate::secret_mint::SecretMint;
use crate::state_store::StateStore;

/// The private, internal bridge network every deployed container attaches to.
pub const NETWORK_NAME: &str = "smartmonitoring";

/// Injected so `apply-config`'s diff confirmation doesn't couple the
/// controller to any particular CLI or terminal.
pub trait ConfirmationPrompt {
    fn confirm(&self, diff: &str) -> bool;
}

/// Always confirms without asking — used under `--silent`.
pub struct SilentAuto;

impl ConfirmationPrompt for SilentAuto {
    fn confirm(&self, _diff: &str) -> bool {
        true
    }
}

pub struct DeploymentController<R: ContainerRuntime> {
    paths: Paths,
    agent_config: AgentConfig,
    runtime: R,
    manifest_store: ManifestStore,
    state_store: StateStore,
    reachability: ReachabilityProbe,
}

impl<R: ContainerRuntime> DeploymentController<R> {
    pub fn new(paths: Paths, agent_config: AgentConfig, runtime: R) -> Self {
        let reachability = ReachabilityProbe::new(agent_config.reachability_probe_urls.clone());
        let manifest_store = ManifestStore::new(paths.clone());
        let state_store = StateStore::new(paths.clone());
        Self {
            paths,
            agent_config,
            runtime,
            manifest_store,
            state_store,
            reachability,
        }
    }

    /// The underlying runtime, exposed for callers (and tests) that need to
    /// inspect it directly rather than through controller operations.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    fn acquire_lock(&self) -> Result<DeploymentLock, AgentError> {
        let status = self.state_store.load_status().ok();
        DeploymentLock::acquire(&self.paths, status.as_ref(), self.agent_config.stuck_deployment_timeout())
    }

    /// Reconcile a stale `Deploying` status left by a crashed agent, per the
    /// startup-reconciliation rule (§4.6). Runs lazily the first time any
    /// operation acquires the lock; safe to call repeatedly.
    pub async fn reconcile_on_startup(&self) -> Result<(), AgentError> {
        let Ok(status) = self.state_store.load_status() else {
            return Ok(());
        };
        if status.status != DeploymentStatus::Deploying {
            return Ok(());
        }
        if !DeploymentLock::is_stale(&status, self.agent_config.stuck_deployment_timeout()) {
            // Still within the stuck-deployment window: a live process may
            // genuinely hold the lock for this transition. Leave the status
            // alone and let `acquire_lock` fail fast with `DeploymentInProgress`.
            return Ok(());
        }

        let Ok(stack) = self.state_store.load_installed_stack() else {
            self.state_store.save_status(
                DeploymentStatus::DeploymentError,
                None,
                None,
                Some("startup reconciliation found no installed stack to verify against"),
            )?;
            return Ok(());
        };

        let mut all_running = true;
        for spec in &stack.manifest.containers {
            let stats = self.runtime.stats(&spec.name).await;
            if stats.status != crate::runtime::ContainerStatus::Running {
                all_running = false;
                break;
            }
        }

        if all_running {
            tracing::info!(event = "status_reconciled", outcome = "deployed");
            self.state_store.save_status(
                DeploymentStatus::Deployed,
                Some(stack.config.update_channel),
                Some(&stack.manifest.package_version),
                None,
            )?;
        } else {
            tracing::warn!(event = "status_reconciled", outcome = "divergent");
            self.state_store.save_status(
                DeploymentStatus::DeploymentError,
                Some(stack.config.update_channel),
                Some(&stack.manifest.package_version),
                Some("startup reconciliation found the running container set diverged from the installed stack"),
            )?;
        }
        Ok(())
    }

    /// Resolve env+mounts for every container in `manifest`, minting secrets
    /// once for the whole manifest.
    fn resolve_stack(
        config: &LocalConfig,
        manifest: &UpdateManifest,
    ) -> Result<Vec<(ContainerSpec, ResolvedContainer)>, AgentError> {
        let secrets = SecretMint::mint(&manifest.dynamic_secrets)?;
        manifest
            .containers
            .iter()
            .map(|spec| Resolver::resolve(config, spec, &secrets).map(|resolved| (spec.clone(), resolved)))
            .collect()
    }

    async fn install(
        &self,
        resolved: &[(ContainerSpec, ResolvedContainer)],
    ) -> Result<(), AgentError> {
        let images: Vec<String> = resolved.iter().map(|(spec, _)| spec.image.clone()).collect();
        self.runtime.pull_all(&images).await?;
        self.runtime.ensure_network(NETWORK_NAME).await?;
        for (spec, container) in resolved {
            self.runtime
                .create(spec, &container.env, &container.mounts, NETWORK_NAME)
                .await?;
        }
        for (spec, _) in resolved {
            self.runtime.start(&spec.name).await?;
        }
        Ok(())
    }

    async fn uninstall_named(&self, names: &[String]) {
        self.runtime.stop_all(names).await.ok();
        self.runtime.remove_all(names).await.ok();
    }

    /// Precondition: not deployed, internet reachable.
    pub async fn deploy(&self) -> Result<(), AgentError> {
        self.reconcile_on_startup().await?;
        let _lock = self.acquire_lock()?;

        if self.state_store.is_deployed() {
            return Err(AgentError::ManifestError("already deployed".to_string()));
        }
        if !self.reachability.is_reachable().await {
            return Err(AgentError::RuntimeUnavailable("no internet connectivity".to_string()));
        }

        let config = self.manifest_store.load_local_config()?;
        let manifest = self
            .manifest_store
            .fetch_manifest(&config.update_manifest_url, config.update_channel)
            .await?;

        self.state_store.save_status(
            DeploymentStatus::Deploying,
            Some(config.update_channel),
            Some(&manifest.package_version),
            None,
        )?;

        let outcome = self.deploy_inner(&config, &manifest).await;
        match outcome {
            Ok(()) => {
                tracing::info!(event = "deploy_finished", version = %manifest.package_version);
                self.state_store.save_installed_stack(&config, &manifest)?;
                self.state_store.save_status(
                    DeploymentStatus::Deployed,
                    Some(config.update_channel),
                    Some(&manifest.package_version),
                    None,
                )?;
                Ok(())
            }
            Err(e) => {
                self.state_store.save_status(
                    DeploymentStatus::DeploymentError,
                    Some(config.update_channel),
                    Some(&manifest.package_version),
                    Some(&e.to_string()),
                )?;
                Err(e)
            }
        }
    }

    async fn deploy_inner(&self, config: &LocalConfig, manifest: &UpdateManifest) -> Result<(), AgentError> {
        let resolved = Self::resolve_stack(config, manifest)?;
        self.install(&resolved).await
    }

    /// Precondition: deployed, no transition in progress.
    pub async fn undeploy(&self) -> Result<(), AgentError> {
        self.reconcile_on_startup().await?;
        let _lock = self.acquire_lock()?;

        let stack = self.state_store.load_installed_stack()?;
        let names: Vec<String> = stack.manifest.containers.iter().map(|c| c.name.clone()).collect();

        self.uninstall_named(&names).await;
        self.runtime.remove_network(NETWORK_NAME).await.ok();
        self.runtime.prune().await;
        self.state_store.clear()?;
        tracing::info!(event = "undeploy_finished");
        Ok(())
    }

    /// Precondition: deployed, no transition in progress. Does not touch
    /// state files.
    pub async fn restart(&self) -> Result<(), AgentError> {
        self.reconcile_on_startup().await?;
        let _lock = self.acquire_lock()?;

        let stack = self.state_store.load_installed_stack()?;
        let names: Vec<String> = stack.manifest.containers.iter().map(|c| c.name.clone()).collect();
        self.runtime.restart_all(&names).await
    }

    /// Precondition: deployed, no transition in progress. Validates the new
    /// config against the currently installed manifest, not the remote one.
    pub async fn apply_config(&self, confirm: &dyn ConfirmationPrompt) -> Result<(), AgentError> {
        self.reconcile_on_startup().await?;
        let _lock = self.acquire_lock()?;

        let stack = self.state_store.load_installed_stack()?;
        let new_config = self.manifest_store.load_local_config()?;

        if new_config == stack.config {
            return Ok(());
        }

        let diff = format!(
            "update_channel: {} -> {}",
            stack.config.update_channel, new_config.update_channel
        );
        if !confirm.confirm(&diff) {
            return Ok(());
        }

        // Per the manifest's own documented semantics, apply-config always
        // passes the installed manifest as both old and new: only the local
        // config changed, but secrets are re-minted and containers
        // re-created from scratch anyway.
        self.replace(&stack.config, &new_config, &stack.manifest, &stack.manifest).await
    }

    /// Precondition: deployed, no transition in progress, internet
    /// reachable. `--force` proceeds for equal or older remote versions too.
    pub async fn update(&self, force: bool) -> Result<(), AgentError> {
        self.reconcile_on_startup().await?;
        let _lock = self.acquire_lock()?;

        if !self.reachability.is_reachable().await {
            return Err(AgentError::RuntimeUnavailable("no internet connectivity".to_string()));
        }

        let stack = self.state_store.load_installed_stack()?;
        let new_manifest = self
            .manifest_store
            .fetch_manifest(&stack.config.update_manifest_url, stack.config.update_channel)
            .await?;

        let local_version = stack
            .manifest
            .version()
            .map_err(|e| AgentError::InstalledStackInvalid(format!("installed package_version is not valid semver: {e}")))?;
        let remote_version = new_manifest
            .version()
            .map_err(|e| AgentError::ManifestError(format!("remote package_version is not valid semver: {e}")))?;

        if remote_version <= local_version && !force {
            tracing::info!(
                event = "update_skipped",
                local = %local_version,
                remote = %remote_version
            );
            return Ok(());
        }

        self.replace(&stack.config, &stack.config, &stack.manifest, &new_manifest).await
    }

    /// The atomic transition (§4.6). On any failure after old containers are
    /// stopped, the old stack is restored and the operation reports failure
    /// without ever leaving a mix of old and new containers running.
    pub async fn replace(
        &self,
        old_cfg: &LocalConfig,
        new_cfg: &LocalConfig,
        old_mf: &UpdateManifest,
        new_mf: &UpdateManifest,
    ) -> Result<(), AgentError> {
        let new_resolved = Self::resolve_stack(new_cfg, new_mf)?;

        self.state_store.save_status(
            DeploymentStatus::Deploying,
            Some(new_cfg.update_channel),
            Some(&new_mf.package_version),
            None,
        )?;
        tracing::info!(
            event = "replace_started",
            old_version = %old_mf.package_version,
            new_version = %new_mf.package_version
        );

        let new_images: Vec<String> = new_resolved.iter().map(|(spec, _)| spec.image.clone()).collect();
        if let Err(e) = self.runtime.pull_all(&new_images).await {
            self.state_store.save_status(
                DeploymentStatus::DeploymentError,
                Some(old_cfg.update_channel),
                Some(&old_mf.package_version),
                Some(&e.to_string()),
            )?;
            self.runtime.prune().await;
            return Err(e);
        }

        if let Err(e) = self.runtime.ensure_network(NETWORK_NAME).await {
            self.state_store.save_status(
                DeploymentStatus::DeploymentError,
                Some(old_cfg.update_channel),
                Some(&old_mf.package_version),
                Some(&e.to_string()),
            )?;
            self.runtime.prune().await;
            return Err(e);
        }

        let old_names: Vec<String> = old_mf.containers.iter().map(|c| c.name.clone()).collect();
        self.uninstall_named(&old_names).await;

        match self.install(&new_resolved).await {
            Ok(()) => {
                self.state_store.save_installed_stack(new_cfg, new_mf)?;
                self.state_store.save_status(
                    DeploymentStatus::Deployed,
                    Some(new_cfg.update_channel),
                    Some(&new_mf.package_version),
                    None,
                )?;
                self.runtime.prune().await;
                tracing::info!(event = "replace_finished", version = %new_mf.package_version);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(event = "replace_rolled_back", error = %e);
                let new_names: Vec<String> = new_mf.containers.iter().map(|c| c.name.clone()).collect();
                self.uninstall_named(&new_names).await;

                // Secrets minted for the failed attempt are discarded; the
                // restored old stack mints fresh ones of its own.
                let old_resolved = Self::resolve_stack(old_cfg, old_mf);
                if let Ok(old_resolved) = old_resolved {
                    self.install(&old_resolved).await.ok();
                }

                self.state_store.save_status(
                    DeploymentStatus::DeploymentError,
                    Some(old_cfg.update_channel),
                    Some(&old_mf.package_version),
                    Some(&e.to_string()),
                )?;
                self.runtime.prune().await;
                Err(e)
            }
        }
    }
}
