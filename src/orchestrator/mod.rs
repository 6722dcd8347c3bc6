//! Batch orchestration over the deployment manager.
//!
//! Fans batches of lifecycle operations out across a bounded worker pool.
//! One failed unit never aborts the rest of the batch; every unit reports
//! its own outcome, and the result vector lines up with the input order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::deployment::{DeploymentManager, DeploymentRecord};
use crate::error::{Result, StackdError};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// One unit of a batch deploy.
#[derive(Debug, Clone)]
pub struct DeploySpec {
    pub tenant_slug: String,
    pub name: String,
    pub manifest: String,
    pub env_vars: HashMap<String, String>,
}

/// Outcome of one batch unit, tagged with the project it addressed.
#[derive(Debug)]
pub struct DeployOutcome {
    pub project_name: String,
    pub result: Result<DeploymentRecord>,
}

/// Fan-out coordinator with bounded concurrency and cooperative
/// cancellation.
pub struct Orchestrator {
    manager: Arc<DeploymentManager>,
    semaphore: Arc<Semaphore>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(manager: Arc<DeploymentManager>, max_concurrent: usize) -> Self {
        Self {
            manager,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn manager(&self) -> &Arc<DeploymentManager> {
        &self.manager
    }

    /// Request cancellation of in-progress batches. Units already dispatched
    /// to the runtime run to completion; undispatched units fail with
    /// [`StackdError::OperationCancelled`].
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        warn!("batch cancellation requested");
    }

    /// Arm the orchestrator for a new batch after a cancellation.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Deploy a batch. Returns one outcome per spec, in input order: a
    /// failed unit contributes its error while the rest proceed.
    #[instrument(skip(self, specs), fields(units = specs.len()))]
    pub async fn deploy_all(&self, specs: Vec<DeploySpec>) -> Vec<DeployOutcome> {
        let mut tasks: JoinSet<(usize, DeployOutcome)> = JoinSet::new();
        let mut slots: Vec<Option<DeployOutcome>> = Vec::new();
        slots.resize_with(specs.len(), || None);
        // Kept outside the tasks so a panicked worker's outcome can still
        // name its project.
        let projects: Vec<String> = specs
            .iter()
            .map(|s| crate::deployment::project_name(&s.tenant_slug, &s.name))
            .collect();

        for (index, spec) in specs.into_iter().enumerate() {
            let manager = self.manager.clone();
            let semaphore = self.semaphore.clone();
            let cancelled = self.cancelled.clone();
            let project = projects[index].clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        if cancelled.load(Ordering::SeqCst) {
                            Err(StackdError::OperationCancelled { unit: project.clone() })
                        } else {
                            manager
                                .deploy(&spec.tenant_slug, &spec.name, &spec.manifest, &spec.env_vars)
                                .await
                        }
                    }
                    Err(_) => Err(StackdError::internal("worker pool closed")),
                };
                (index, DeployOutcome { project_name: project, result })
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => slots[index] = Some(outcome),
                Err(e) => {
                    // A panicked worker loses its index; surface it rather
                    // than leave a hole in the batch.
                    warn!(error = %e, "batch worker panicked");
                }
            }
        }

        let outcomes: Vec<DeployOutcome> = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| DeployOutcome {
                    project_name: projects[index].clone(),
                    result: Err(StackdError::internal("batch worker aborted")),
                })
            })
            .collect();

        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        info!(total = outcomes.len(), failed, "batch deploy finished");
        metrics::counter!("stackd_batch_units_total", "outcome" => "failure").increment(failed as u64);
        metrics::counter!("stackd_batch_units_total", "outcome" => "success")
            .increment((outcomes.len() - failed) as u64);
        outcomes
    }

    /// Stop a batch of projects. One result per project, in input order.
    #[instrument(skip(self, projects), fields(units = projects.len()))]
    pub async fn stop_all(&self, projects: Vec<String>) -> Vec<(String, Result<()>)> {
        self.for_each_project(projects, |manager, project| async move {
            manager.stop(&project).await
        })
        .await
    }

    /// Remove a batch of projects. One result per project, in input order.
    #[instrument(skip(self, projects), fields(units = projects.len()))]
    pub async fn remove_all(&self, projects: Vec<String>) -> Vec<(String, Result<()>)> {
        self.for_each_project(projects, |manager, project| async move {
            manager.remove(&project).await
        })
        .await
    }

    async fn for_each_project<F, Fut>(
        &self,
        projects: Vec<String>,
        op: F,
    ) -> Vec<(String, Result<()>)>
    where
        F: Fn(Arc<DeploymentManager>, String) -> Fut + Clone + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send,
    {
        let mut tasks: JoinSet<(usize, String, Result<()>)> = JoinSet::new();
        let mut slots: Vec<Option<(String, Result<()>)>> = Vec::new();
        slots.resize_with(projects.len(), || None);

        for (index, project) in projects.iter().cloned().enumerate() {
            let manager = self.manager.clone();
            let semaphore = self.semaphore.clone();
            let cancelled = self.cancelled.clone();
            let op = op.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        if cancelled.load(Ordering::SeqCst) {
                            Err(StackdError::OperationCancelled { unit: project.clone() })
                        } else {
                            op(manager, project.clone()).await
                        }
                    }
                    Err(_) => Err(StackdError::internal("worker pool closed")),
                };
                (index, project, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, project, result)) => slots[index] = Some((project, result)),
                Err(e) => warn!(error = %e, "batch worker panicked"),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    (
                        projects[index].clone(),
                        Err(StackdError::internal("batch worker aborted")),
                    )
                })
            })
            .collect()
    }

    /// Health-check an explicit list of projects. Every requested project
    /// appears in the result: absent ones as `DeploymentNotFound` entries.
    #[instrument(skip(self, projects), fields(units = projects.len()))]
    pub async fn health_check_all(&self, projects: Vec<String>) -> HashMap<String, Result<bool>> {
        let mut tasks: JoinSet<(String, Result<bool>)> = JoinSet::new();
        for project in projects {
            let manager = self.manager.clone();
            let semaphore = self.semaphore.clone();
            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => manager.health_check(&project).await,
                    Err(_) => Err(StackdError::internal("worker pool closed")),
                };
                (project, result)
            });
        }

        let mut results = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((project, result)) => {
                    results.insert(project, result);
                }
                Err(e) => warn!(error = %e, "health check worker panicked"),
            }
        }
        results
    }

    /// Health-check every tracked deployment, optionally scoped to a tenant.
    pub async fn health_check_tenant(
        &self,
        tenant_slug: Option<&str>,
    ) -> HashMap<String, Result<bool>> {
        let projects = self
            .manager
            .list(tenant_slug)
            .await
            .into_iter()
            .map(|r| r.project_name)
            .collect();
        self.health_check_all(projects).await
    }
}
