//! Multitenant Docker Compose deployment engine.
//!
//! `stackd` validates Compose v3 manifests, enforces per-tenant quotas
//! through reservation leases, tracks every deployment through an explicit
//! lifecycle state machine, and fans batch operations out over a bounded
//! worker pool. All state is persisted write-first to a SQLite-backed blob
//! store, so acknowledged mutations survive a restart.

pub mod compose;
pub mod config;
pub mod deployment;
pub mod error;
pub mod locks;
pub mod observability;
pub mod orchestrator;
pub mod quota;
pub mod runtime;
pub mod store;
pub mod tenant;

// Re-export commonly used items
pub use compose::{ComposeFile, ComposeParser, ManifestDescriptor};
pub use config::Config;
pub use deployment::{
    DeploymentManager, DeploymentRecord, DeploymentState, DeploymentTracker, RuntimePolicy,
};
pub use error::{Result, StackdError};
pub use observability::init as init_observability;
pub use orchestrator::{DeployOutcome, DeploySpec, Orchestrator};
pub use quota::{QuotaEnforcer, Reservation};
pub use runtime::{ContainerInfo, ContainerRuntime, SimulatedRuntime};
pub use store::{BlobStore, SqliteStore};
pub use tenant::{Tenant, TenantQuotas, TenantRegistry, TenantUpdate};

use std::sync::Arc;

/// Assemble a ready-to-use [`Orchestrator`] over a store and a runtime.
pub async fn bootstrap(
    config: &Config,
    store: Arc<dyn BlobStore>,
    runtime: Arc<dyn ContainerRuntime>,
) -> Result<Orchestrator> {
    config.validate()?;
    let registry = Arc::new(TenantRegistry::load(store.clone()).await?);
    let tracker = Arc::new(DeploymentTracker::load(store).await?);
    let quota = Arc::new(QuotaEnforcer::with_ttl(
        registry.clone(),
        tracker.clone(),
        config.reservation_ttl(),
    ));
    let manager = Arc::new(DeploymentManager::new(
        registry,
        tracker,
        quota,
        runtime,
        config.runtime_policy(),
    ));
    Ok(Orchestrator::new(manager, config.max_concurrent_operations))
}
