//! End-to-end lifecycle tests over the simulated runtime and an in-memory
//! store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use stackd::{
    bootstrap, Config, ContainerRuntime, DeploySpec, DeploymentState, Orchestrator,
    SimulatedRuntime, SqliteStore, StackdError, TenantQuotas,
};

const WEB_MANIFEST: &str = r#"
version: '3'
services:
  web:
    image: nginx:latest
    deploy:
      replicas: 2
"#;

const SINGLE_MANIFEST: &str = r#"
version: '3'
services:
  app:
    image: alpine:3.20
"#;

const BAD_MANIFEST: &str = r#"
version: '2.4'
services:
  app:
    image: alpine:3.20
"#;

async fn engine() -> (Orchestrator, Arc<SimulatedRuntime>, Arc<SqliteStore>) {
    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let runtime = Arc::new(SimulatedRuntime::new());
    let orchestrator = bootstrap(&Config::default(), store.clone(), runtime.clone())
        .await
        .unwrap();
    (orchestrator, runtime, store)
}

fn spec(tenant: &str, name: &str, manifest: &str) -> DeploySpec {
    DeploySpec {
        tenant_slug: tenant.to_string(),
        name: name.to_string(),
        manifest: manifest.to_string(),
        env_vars: HashMap::new(),
    }
}

#[tokio::test]
async fn test_quota_cycle_release_on_remove() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    let quotas = TenantQuotas { max_deployments: 1, max_containers: 2, ..Default::default() };
    manager.registry().create("Acme", "acme", "", quotas).await.unwrap();

    // First deploy fits exactly: one deployment, two containers.
    let record = manager.deploy("acme", "app1", WEB_MANIFEST, &HashMap::new()).await.unwrap();
    assert_eq!(record.state, DeploymentState::Deployed);
    assert_eq!(record.containers.len(), 2);
    assert_eq!(runtime.container_count().await, 2);

    // Second deploy is over quota on both axes.
    let err = manager.deploy("acme", "app2", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::QuotaExceeded { .. }));

    // Removing the first frees the quota; the retry then succeeds.
    manager.remove("acme_app1").await.unwrap();
    assert!(manager.tracker().get("acme_app1").await.is_none());
    let record = manager.deploy("acme", "app2", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();
    assert_eq!(record.project_name, "acme_app2");
    assert_eq!(runtime.container_count().await, 1);
}

#[tokio::test]
async fn test_batch_isolates_failures_and_preserves_order() {
    let (orchestrator, _runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();

    let specs = vec![
        spec("acme", "a", SINGLE_MANIFEST),
        spec("acme", "bad", BAD_MANIFEST),
        spec("ghost", "c", SINGLE_MANIFEST),
        spec("acme", "d", SINGLE_MANIFEST),
    ];
    let outcomes = orchestrator.deploy_all(specs).await;

    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0].project_name, "acme_a");
    assert!(outcomes[0].result.is_ok());
    assert!(matches!(
        outcomes[1].result,
        Err(StackdError::UnsupportedComposeVersion { .. })
    ));
    assert!(matches!(outcomes[2].result, Err(StackdError::TenantNotFound { .. })));
    assert!(outcomes[3].result.is_ok());

    // The failed units left nothing behind in the tracker.
    assert!(manager.tracker().get("acme_bad").await.is_none());
    assert_eq!(manager.list(Some("acme")).await.len(), 2);
}

#[tokio::test]
async fn test_stop_and_remove_are_idempotent() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();

    manager.stop("acme_app").await.unwrap();
    let record = manager.tracker().get("acme_app").await.unwrap();
    assert_eq!(record.state, DeploymentState::Stopped);
    // Containers stay attached while stopped.
    assert_eq!(record.containers.len(), 1);

    // Stopping again and stopping the unknown are both no-ops.
    manager.stop("acme_app").await.unwrap();
    manager.stop("acme_ghost").await.unwrap();

    manager.remove("acme_app").await.unwrap();
    manager.remove("acme_app").await.unwrap();
    manager.remove("acme_ghost").await.unwrap();
    assert_eq!(runtime.container_count().await, 0);
}

#[tokio::test]
async fn test_runtime_failure_leaves_failed_record_and_releases_quota() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    let quotas = TenantQuotas { max_deployments: 1, max_containers: 5, ..Default::default() };
    manager.registry().create("Acme", "acme", "", quotas).await.unwrap();

    runtime.fail_project("acme_app").await;
    let err = manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::RuntimeUnavailable { .. }));

    let record = manager.tracker().get("acme_app").await.unwrap();
    assert_eq!(record.state, DeploymentState::Failed);
    assert!(record.error.is_some());

    // The failed record blocks reuse of its project name until removed.
    let err = manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::DuplicateDeployment { .. }));

    // The failed record keeps holding its deployment slot.
    let err = manager.deploy("acme", "other", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::QuotaExceeded { .. }));

    // Failed recovers through removal, which frees the slot.
    manager.remove("acme_app").await.unwrap();
    assert!(manager.tracker().get("acme_app").await.is_none());
    manager.deploy("acme", "other", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();
}

#[tokio::test]
async fn test_transient_stop_failure_is_retried() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();

    // A single transient outage is absorbed by the retry budget.
    runtime.fail_next_stops(1);
    manager.stop("acme_app").await.unwrap();
    let record = manager.tracker().get("acme_app").await.unwrap();
    assert_eq!(record.state, DeploymentState::Stopped);

    // An outage outlasting the budget still fails the operation.
    runtime.fail_next_stops(10);
    let err = manager.remove("acme_app").await.unwrap_err();
    assert!(matches!(err, StackdError::RuntimeUnavailable { .. }));
    let record = manager.tracker().get("acme_app").await.unwrap();
    assert_eq!(record.state, DeploymentState::Failed);

    // Once the runtime recovers, removal completes.
    runtime.fail_next_stops(0);
    manager.remove("acme_app").await.unwrap();
    assert!(manager.tracker().get("acme_app").await.is_none());
}

#[tokio::test]
async fn test_inactive_tenant_cannot_deploy() {
    let (orchestrator, _runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    manager
        .registry()
        .update("acme", stackd::TenantUpdate { active: Some(false), ..Default::default() })
        .await
        .unwrap();

    let err = manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::TenantInactive { .. }));
}

#[tokio::test]
async fn test_tenant_delete_guarded_by_live_deployments() {
    let (orchestrator, _runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();

    let err = manager.delete_tenant("acme").await.unwrap_err();
    assert!(matches!(err, StackdError::TenantHasActiveDeployments { count: 1, .. }));

    manager.remove("acme_app").await.unwrap();
    assert!(manager.delete_tenant("acme").await.unwrap());
}

#[tokio::test]
async fn test_health_check_flags_missing_containers() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    let record = manager.deploy("acme", "web", WEB_MANIFEST, &HashMap::new()).await.unwrap();

    assert!(manager.health_check("acme_web").await.unwrap());

    // Stop a container behind the engine's back.
    runtime.stop_container(&record.containers[0]).await.unwrap();
    assert!(!manager.health_check("acme_web").await.unwrap());
    let record = manager.tracker().get("acme_web").await.unwrap();
    assert!(!record.warnings.is_empty());
    // The discrepancy is reported, not repaired.
    assert_eq!(record.state, DeploymentState::Deployed);

    let err = manager.health_check("acme_ghost").await.unwrap_err();
    assert!(matches!(err, StackdError::DeploymentNotFound { .. }));
}

#[tokio::test]
async fn test_health_check_all_reports_per_project() {
    let (orchestrator, runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
    manager.deploy("acme", "a", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();
    let b = manager.deploy("acme", "b", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();
    runtime.stop_container(&b.containers[0]).await.unwrap();

    let results = orchestrator.health_check_tenant(Some("acme")).await;
    assert_eq!(results.len(), 2);
    assert_eq!(*results["acme_a"].as_ref().unwrap(), true);
    assert_eq!(*results["acme_b"].as_ref().unwrap(), false);

    // An explicit list echoes every requested project, absent ones included.
    let requested =
        vec!["acme_a".to_string(), "acme_b".to_string(), "acme_ghost".to_string()];
    let results = orchestrator.health_check_all(requested).await;
    assert_eq!(results.len(), 3);
    assert_eq!(*results["acme_a"].as_ref().unwrap(), true);
    assert!(matches!(
        results["acme_ghost"],
        Err(StackdError::DeploymentNotFound { .. })
    ));
}

#[tokio::test]
async fn test_cancellation_fails_undispatched_units() {
    let (orchestrator, _runtime, _store) = engine().await;
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();

    orchestrator.cancel();
    let outcomes = orchestrator.deploy_all(vec![spec("acme", "a", SINGLE_MANIFEST)]).await;
    assert!(matches!(
        outcomes[0].result,
        Err(StackdError::OperationCancelled { .. })
    ));
    assert!(manager.tracker().get("acme_a").await.is_none());

    // Re-arming lets the next batch through.
    orchestrator.reset();
    let outcomes = orchestrator.deploy_all(vec![spec("acme", "a", SINGLE_MANIFEST)]).await;
    assert!(outcomes[0].result.is_ok());
}

#[tokio::test]
async fn test_state_survives_restart() {
    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let runtime = Arc::new(SimulatedRuntime::new());
    let config = Config::default();

    {
        let orchestrator =
            bootstrap(&config, store.clone(), runtime.clone()).await.unwrap();
        let manager = orchestrator.manager();
        manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();
        manager.deploy("acme", "app", SINGLE_MANIFEST, &HashMap::new()).await.unwrap();
    }

    // A fresh engine over the same store sees the tenant and the record.
    let orchestrator = bootstrap(&config, store, runtime).await.unwrap();
    let manager = orchestrator.manager();
    let tenant = manager.registry().get("acme").await.unwrap();
    assert_eq!(tenant.slug, "acme");
    let record = manager.tracker().get("acme_app").await.unwrap();
    assert_eq!(record.state, DeploymentState::Deployed);
    assert_eq!(record.containers.len(), 1);
}

#[tokio::test]
async fn test_timeout_surfaces_as_runtime_timeout() {
    let store = Arc::new(SqliteStore::new_in_memory().await.unwrap());
    let runtime = Arc::new(SimulatedRuntime::new());
    let config = Config {
        runtime_timeout_secs: 1,
        runtime_retries: 0,
        ..Default::default()
    };
    let orchestrator = bootstrap(&config, store, runtime.clone()).await.unwrap();
    let manager = orchestrator.manager().clone();
    manager.registry().create("Acme", "acme", "", TenantQuotas::default()).await.unwrap();

    runtime.set_latency(Duration::from_secs(5)).await;
    let err = manager.deploy("acme", "slow", SINGLE_MANIFEST, &HashMap::new()).await.unwrap_err();
    assert!(matches!(err, StackdError::RuntimeTimeout { .. }));
    let record = manager.tracker().get("acme_slow").await.unwrap();
    assert_eq!(record.state, DeploymentState::Failed);
}
