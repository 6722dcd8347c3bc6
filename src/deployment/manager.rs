//! Deployment lifecycle operations.
//!
//! The manager drives every deployment through the tracker's state machine
//! while talking to the container runtime. All operations on one project are
//! serialized by a per-project lock, so a deploy and a remove for the same
//! project can never interleave; operations on different projects run
//! concurrently.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::compose::{ComposeFile, ComposeParser};
use crate::deployment::{
    project_name, DeploymentRecord, DeploymentState, DeploymentTracker,
};
use crate::error::{Result, StackdError};
use crate::locks::KeyedLocks;
use crate::quota::QuotaEnforcer;
use crate::runtime::{project_selector, ContainerRuntime};
use crate::tenant::TenantRegistry;

/// Runtime call policy.
#[derive(Debug, Clone, Copy)]
pub struct RuntimePolicy {
    /// Deadline for a single runtime call.
    pub timeout: Duration,
    /// Additional attempts after a retryable failure of `create_stack`.
    pub retries: u32,
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30), retries: 2 }
    }
}

/// Coordinates the registry, quota enforcer, tracker, and runtime for the
/// full deployment lifecycle.
pub struct DeploymentManager {
    registry: Arc<TenantRegistry>,
    tracker: Arc<DeploymentTracker>,
    quota: Arc<QuotaEnforcer>,
    runtime: Arc<dyn ContainerRuntime>,
    project_locks: KeyedLocks,
    policy: RuntimePolicy,
}

impl DeploymentManager {
    pub fn new(
        registry: Arc<TenantRegistry>,
        tracker: Arc<DeploymentTracker>,
        quota: Arc<QuotaEnforcer>,
        runtime: Arc<dyn ContainerRuntime>,
        policy: RuntimePolicy,
    ) -> Self {
        Self {
            registry,
            tracker,
            quota,
            runtime,
            project_locks: KeyedLocks::new(),
            policy,
        }
    }

    pub fn tracker(&self) -> &Arc<DeploymentTracker> {
        &self.tracker
    }

    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Deploy a manifest for a tenant under the project name
    /// `{tenant_slug}_{name}`.
    ///
    /// Validation and quota admission happen before any runtime call; a
    /// failed runtime call leaves the record in `Failed` with its quota
    /// reservation released.
    #[instrument(skip(self, manifest, env_vars), fields(tenant = %tenant_slug, name = %name))]
    pub async fn deploy(
        &self,
        tenant_slug: &str,
        name: &str,
        manifest: &str,
        env_vars: &HashMap<String, String>,
    ) -> Result<DeploymentRecord> {
        let tenant = self.registry.get(tenant_slug).await?;
        if !tenant.active {
            return Err(StackdError::TenantInactive { slug: tenant_slug.to_string() });
        }

        let compose = ComposeParser::parse(manifest)?;
        let descriptor = ComposeParser::describe(&compose);
        let project = project_name(tenant_slug, name);

        let _guard = self.project_locks.acquire(&project).await;

        if self.tracker.get(&project).await.is_some() {
            return Err(StackdError::DuplicateDeployment { project });
        }

        let reservation = self
            .quota
            .check_and_reserve(tenant_slug, descriptor.total_containers())
            .await?;

        let record = DeploymentRecord::new(&project, tenant_slug, manifest);
        if let Err(e) = self.tracker.insert(record).await {
            self.quota.release(&reservation);
            return Err(e);
        }

        match self.create_stack_with_retries(&compose, &project, env_vars).await {
            Ok(containers) => {
                let ids = containers.into_iter().map(|c| c.id).collect();
                let record = self.tracker.mark_deployed(&project, ids).await?;
                self.quota.commit(&reservation);
                metrics::counter!("stackd_deploys_total", "outcome" => "success").increment(1);
                info!(project = %project, containers = record.containers.len(), "deployment up");
                Ok(record)
            }
            Err(e) => {
                // Publish the Failed record before releasing the lease so
                // the slot is covered by one or the other at every instant.
                if let Err(me) = self.tracker.mark_failed(&project, &e.to_string()).await {
                    error!(project = %project, error = %me, "failed to record deploy failure");
                }
                self.quota.release(&reservation);
                metrics::counter!("stackd_deploys_total", "outcome" => "failure").increment(1);
                warn!(project = %project, error = %e, "deployment failed");
                Err(e)
            }
        }
    }

    async fn create_stack_with_retries(
        &self,
        compose: &ComposeFile,
        project: &str,
        env_vars: &HashMap<String, String>,
    ) -> Result<Vec<crate::runtime::ContainerInfo>> {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(
                self.policy.timeout,
                self.runtime.create_stack(compose, project, env_vars),
            )
            .await
            .unwrap_or(Err(StackdError::RuntimeTimeout { operation: "create_stack".to_string() }));

            match result {
                Ok(containers) => return Ok(containers),
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(project = %project, attempt, error = %e, "retrying stack creation");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stop a deployment's containers. The record keeps its container ids so
    /// the deployment can later be removed (or inspected). Stopping an
    /// absent or already-stopped deployment is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self, project: &str) -> Result<()> {
        let _guard = self.project_locks.acquire(project).await;

        let Some(record) = self.tracker.get(project).await else {
            return Ok(());
        };
        match record.state {
            DeploymentState::Stopped => return Ok(()),
            DeploymentState::Deployed => {}
            other => {
                return Err(StackdError::InvalidTransition {
                    project: project.to_string(),
                    from: other.as_str().to_string(),
                    to: DeploymentState::Stopping.as_str().to_string(),
                });
            }
        }

        self.tracker.transition(project, DeploymentState::Stopping).await?;
        for id in &record.containers {
            if let Err(e) =
                self.call_runtime("stop_container", || self.runtime.stop_container(id)).await
            {
                self.tracker.mark_failed(project, &e.to_string()).await?;
                return Err(e);
            }
        }
        self.tracker.transition(project, DeploymentState::Stopped).await?;
        info!(project = %project, "deployment stopped");
        Ok(())
    }

    /// Tear a deployment down and purge its record. Also sweeps the runtime
    /// for containers labeled with the project that the record has lost track
    /// of. Removing an absent deployment is a no-op.
    #[instrument(skip(self))]
    pub async fn remove(&self, project: &str) -> Result<()> {
        let _guard = self.project_locks.acquire(project).await;

        let Some(record) = self.tracker.get(project).await else {
            return Ok(());
        };
        if record.state == DeploymentState::Removed {
            self.tracker.purge(project).await?;
            return Ok(());
        }

        self.tracker.transition(project, DeploymentState::Removing).await?;

        let mut ids: Vec<String> = record.containers.clone();
        let mut seen: HashSet<String> = ids.iter().cloned().collect();
        match self.runtime.list_containers(&project_selector(project)).await {
            Ok(found) => {
                for container in found {
                    if seen.insert(container.id.clone()) {
                        self.tracker
                            .add_warning(
                                project,
                                &format!("untracked container {} swept during removal", container.id),
                            )
                            .await?;
                        ids.push(container.id);
                    }
                }
            }
            Err(e) => {
                warn!(project = %project, error = %e, "container sweep failed, removing tracked containers only");
            }
        }

        for id in &ids {
            let result = async {
                self.call_runtime("stop_container", || self.runtime.stop_container(id)).await?;
                self.call_runtime("remove_container", || self.runtime.remove_container(id)).await
            }
            .await;
            if let Err(e) = result {
                self.tracker.mark_failed(project, &e.to_string()).await?;
                return Err(e);
            }
        }

        self.tracker.mark_removed(project).await?;
        self.tracker.purge(project).await?;
        info!(project = %project, "deployment removed");
        Ok(())
    }

    /// Run a runtime call under the deadline, retrying retryable failures up
    /// to the policy's attempt budget. Same discipline as stack creation.
    async fn call_runtime<F, Fut>(&self, operation: &str, mut call: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::time::timeout(self.policy.timeout, call())
                .await
                .unwrap_or(Err(StackdError::RuntimeTimeout {
                    operation: operation.to_string(),
                }));
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.policy.retries => {
                    attempt += 1;
                    warn!(operation, attempt, error = %e, "retrying runtime call");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// List deployments, optionally scoped to one tenant.
    pub async fn list(&self, tenant_slug: Option<&str>) -> Vec<DeploymentRecord> {
        self.tracker.list(tenant_slug).await
    }

    /// Check whether a deployment's containers are all present in the
    /// runtime. A deployment is healthy only in `Deployed` state with every
    /// tracked container running. Discrepancies are attached to the record
    /// as warnings, never silently repaired.
    #[instrument(skip(self))]
    pub async fn health_check(&self, project: &str) -> Result<bool> {
        let record = self
            .tracker
            .get(project)
            .await
            .ok_or_else(|| StackdError::DeploymentNotFound { project: project.to_string() })?;
        if record.state != DeploymentState::Deployed {
            return Ok(false);
        }

        let running: HashSet<String> = self
            .runtime
            .list_containers(&project_selector(project))
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        let mut healthy = true;
        for id in &record.containers {
            if !running.contains(id) {
                healthy = false;
                self.tracker
                    .add_warning(project, &format!("container {} missing from runtime", id))
                    .await?;
            }
        }
        Ok(healthy)
    }

    /// Delete a tenant. Refused while the tenant has any live deployment
    /// record; callers must remove the deployments first.
    #[instrument(skip(self))]
    pub async fn delete_tenant(&self, tenant_slug: &str) -> Result<bool> {
        let live = self
            .tracker
            .list(Some(tenant_slug))
            .await
            .into_iter()
            .filter(|r| !r.state.is_terminal())
            .count();
        if live > 0 {
            return Err(StackdError::TenantHasActiveDeployments {
                slug: tenant_slug.to_string(),
                count: live,
            });
        }
        self.registry.delete(tenant_slug).await
    }
}
