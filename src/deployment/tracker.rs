//! Authoritative deployment record tracking.
//!
//! The tracker owns every [`DeploymentRecord`] and is the source of truth
//! for per-tenant usage. Mutations are serialized per project and follow a
//! write-then-acknowledge discipline: the record is persisted to the store
//! before the in-memory view changes, so a crash between the two leaves the
//! store ahead of memory, never behind.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::deployment::{DeploymentRecord, DeploymentState};
use crate::error::{Result, StackdError};
use crate::locks::KeyedLocks;
use crate::store::BlobStore;

const KEY_PREFIX: &str = "deployment/";

fn record_key(project_name: &str) -> String {
    format!("{}{}", KEY_PREFIX, project_name)
}

/// Aggregate usage for one tenant.
///
/// Pending records are excluded from the deployment count: until a deploy
/// confirms, its quota footprint is carried by the live reservation instead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantUsage {
    pub deployments: u32,
    pub containers: u32,
}

/// In-memory deployment index backed by a [`BlobStore`].
pub struct DeploymentTracker {
    store: Arc<dyn BlobStore>,
    records: RwLock<HashMap<String, DeploymentRecord>>,
    locks: KeyedLocks,
}

impl DeploymentTracker {
    /// Create a tracker and hydrate it from the store.
    #[instrument(skip(store))]
    pub async fn load(store: Arc<dyn BlobStore>) -> Result<Self> {
        let mut records = HashMap::new();
        for key in store.list_keys(KEY_PREFIX).await? {
            let Some(raw) = store.get(&key).await? else {
                continue;
            };
            match serde_json::from_slice::<DeploymentRecord>(&raw) {
                Ok(record) => {
                    records.insert(record.project_name.clone(), record);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping undecodable deployment record");
                }
            }
        }
        debug!(count = records.len(), "hydrated deployment records");
        Ok(Self {
            store,
            records: RwLock::new(records),
            locks: KeyedLocks::new(),
        })
    }

    async fn persist(&self, record: &DeploymentRecord) -> Result<()> {
        let raw = serde_json::to_vec(record)
            .map_err(|e| StackdError::internal(format!("serialize deployment record: {}", e)))?;
        self.store.put(&record_key(&record.project_name), &raw).await
    }

    /// Register a new record. Fails if the project name is already taken by
    /// any record that has not been purged.
    #[instrument(skip(self, record), fields(project = %record.project_name))]
    pub async fn insert(&self, record: DeploymentRecord) -> Result<()> {
        let _guard = self.locks.acquire(&record.project_name).await;
        if self.records.read().await.contains_key(&record.project_name) {
            return Err(StackdError::DuplicateDeployment {
                project: record.project_name.clone(),
            });
        }
        self.persist(&record).await?;
        self.records
            .write()
            .await
            .insert(record.project_name.clone(), record);
        metrics::counter!("stackd_deployments_tracked_total").increment(1);
        Ok(())
    }

    /// Fetch a record by project name.
    pub async fn get(&self, project_name: &str) -> Option<DeploymentRecord> {
        self.records.read().await.get(project_name).cloned()
    }

    /// List records, optionally filtered to one tenant. Sorted by project
    /// name for stable output.
    pub async fn list(&self, tenant_slug: Option<&str>) -> Vec<DeploymentRecord> {
        let records = self.records.read().await;
        let mut out: Vec<DeploymentRecord> = records
            .values()
            .filter(|r| tenant_slug.map_or(true, |slug| r.tenant_slug == slug))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.project_name.cmp(&b.project_name));
        out
    }

    /// Live usage for a tenant: confirmed deployments and their attached
    /// containers.
    pub async fn usage_for_tenant(&self, tenant_slug: &str) -> TenantUsage {
        let records = self.records.read().await;
        let mut usage = TenantUsage::default();
        for record in records.values() {
            if record.tenant_slug != tenant_slug {
                continue;
            }
            match record.state {
                DeploymentState::Pending | DeploymentState::Removed => {}
                _ => {
                    usage.deployments = usage.deployments.saturating_add(1);
                    usage.containers =
                        usage.containers.saturating_add(record.containers.len() as u32);
                }
            }
        }
        usage
    }

    /// Apply `mutate` to the record under its project lock, validate the
    /// state edge if the mutation changes state, persist, then publish.
    async fn update_record<F>(&self, project_name: &str, mutate: F) -> Result<DeploymentRecord>
    where
        F: FnOnce(&mut DeploymentRecord),
    {
        let _guard = self.locks.acquire(project_name).await;
        let mut record = self
            .get(project_name)
            .await
            .ok_or_else(|| StackdError::DeploymentNotFound {
                project: project_name.to_string(),
            })?;
        let from = record.state;
        mutate(&mut record);
        if record.state != from && !from.can_transition(record.state) {
            return Err(StackdError::InvalidTransition {
                project: project_name.to_string(),
                from: from.as_str().to_string(),
                to: record.state.as_str().to_string(),
            });
        }
        record.updated_at = chrono::Utc::now().max(record.updated_at);
        self.persist(&record).await?;
        self.records
            .write()
            .await
            .insert(project_name.to_string(), record.clone());
        if record.state != from {
            debug!(project = %project_name, from = %from, to = %record.state, "deployment transition");
            metrics::counter!(
                "stackd_deployment_transitions_total",
                "to" => record.state.as_str()
            )
            .increment(1);
        }
        Ok(record)
    }

    /// Move a record to a new state.
    #[instrument(skip(self))]
    pub async fn transition(&self, project_name: &str, to: DeploymentState) -> Result<DeploymentRecord> {
        self.update_record(project_name, |r| r.state = to).await
    }

    /// Confirm a deploy: attach container ids and move to `Deployed` in one
    /// persisted write.
    #[instrument(skip(self, containers))]
    pub async fn mark_deployed(
        &self,
        project_name: &str,
        containers: Vec<String>,
    ) -> Result<DeploymentRecord> {
        self.update_record(project_name, |r| {
            r.containers = containers;
            r.error = None;
            r.state = DeploymentState::Deployed;
        })
        .await
    }

    /// Record an unrecoverable failure with its cause.
    #[instrument(skip(self, cause))]
    pub async fn mark_failed(&self, project_name: &str, cause: &str) -> Result<DeploymentRecord> {
        let cause = cause.to_string();
        self.update_record(project_name, move |r| {
            r.error = Some(cause);
            r.state = DeploymentState::Failed;
        })
        .await
    }

    /// Confirm teardown: clear the container list and move to `Removed`.
    #[instrument(skip(self))]
    pub async fn mark_removed(&self, project_name: &str) -> Result<DeploymentRecord> {
        self.update_record(project_name, |r| {
            r.containers.clear();
            r.state = DeploymentState::Removed;
        })
        .await
    }

    /// Attach a diagnostic warning without touching state.
    #[instrument(skip(self, warning))]
    pub async fn add_warning(&self, project_name: &str, warning: &str) -> Result<DeploymentRecord> {
        let warning = warning.to_string();
        self.update_record(project_name, move |r| r.warnings.push(warning))
            .await
    }

    /// Drop a record from the store and the index. Only `Removed` records
    /// may be purged.
    #[instrument(skip(self))]
    pub async fn purge(&self, project_name: &str) -> Result<()> {
        let _guard = self.locks.acquire(project_name).await;
        let Some(record) = self.get(project_name).await else {
            return Ok(());
        };
        if record.state != DeploymentState::Removed {
            return Err(StackdError::InvalidTransition {
                project: project_name.to_string(),
                from: record.state.as_str().to_string(),
                to: "purged".to_string(),
            });
        }
        self.store.delete(&record_key(project_name)).await?;
        self.records.write().await.remove(project_name);
        Ok(())
    }
}
