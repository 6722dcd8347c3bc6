//! Simulated container runtime for tests and local development.

use super::{ContainerInfo, ContainerRuntime, COMPOSE_PROJECT_LABEL};
use crate::compose::ComposeFile;
use crate::error::{Result, StackdError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SimState {
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
struct SimContainer {
    info: ContainerInfo,
    state: SimState,
}

/// In-memory runtime honoring the [`ContainerRuntime`] contract.
///
/// Projects can be marked as failing to exercise partial-failure paths, and
/// an artificial latency can be configured to exercise timeouts.
#[derive(Default)]
pub struct SimulatedRuntime {
    containers: RwLock<HashMap<String, SimContainer>>,
    failing_projects: RwLock<HashSet<String>>,
    failing_stops: AtomicU64,
    latency: RwLock<Option<Duration>>,
    next_id: AtomicU64,
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create_stack` for a project fail with `RuntimeUnavailable`.
    pub async fn fail_project(&self, project: &str) {
        self.failing_projects.write().await.insert(project.to_string());
    }

    /// Make the next `n` calls to `stop_container` fail with
    /// `RuntimeUnavailable`, simulating a transient runtime outage.
    pub fn fail_next_stops(&self, n: u64) {
        self.failing_stops.store(n, Ordering::SeqCst);
    }

    /// Delay every runtime call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.write().await = Some(latency);
    }

    /// Number of containers currently known to the runtime, any state.
    pub async fn container_count(&self) -> usize {
        self.containers.read().await.len()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = *self.latency.read().await {
            tokio::time::sleep(latency).await;
        }
    }

    fn matches(info: &ContainerInfo, selector: &str) -> bool {
        match selector.split_once('=') {
            Some((key, value)) => info.labels.get(key).map(String::as_str) == Some(value),
            None => info.labels.contains_key(selector),
        }
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    async fn create_stack(
        &self,
        compose: &ComposeFile,
        project: &str,
        env_vars: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>> {
        self.simulate_latency().await;

        if self.failing_projects.read().await.contains(project) {
            return Err(StackdError::RuntimeUnavailable {
                reason: format!("simulated failure for project {}", project),
            });
        }

        let _ = env_vars;

        let mut created = Vec::new();
        let mut containers = self.containers.write().await;

        // Stable service order keeps container names deterministic in tests.
        let mut names: Vec<&String> = compose.services.keys().collect();
        names.sort();

        for service_name in names {
            let service = &compose.services[service_name];
            for replica in 1..=service.container_count() {
                let id = format!("sim-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
                let mut labels = HashMap::new();
                labels.insert(COMPOSE_PROJECT_LABEL.to_string(), project.to_string());
                labels.insert(
                    "com.docker.compose.service".to_string(),
                    service_name.to_string(),
                );

                let info = ContainerInfo {
                    id: id.clone(),
                    name: format!("{}_{}_{}", project, service_name, replica),
                    labels,
                };
                containers
                    .insert(id, SimContainer { info: info.clone(), state: SimState::Running });
                created.push(info);
            }
        }

        Ok(created)
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        self.simulate_latency().await;

        if self
            .failing_stops
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StackdError::RuntimeUnavailable {
                reason: "simulated transient stop failure".to_string(),
            });
        }

        let mut containers = self.containers.write().await;
        match containers.get_mut(id) {
            Some(container) => {
                container.state = SimState::Stopped;
                Ok(())
            }
            None => Err(StackdError::RuntimeUnavailable {
                reason: format!("no such container: {}", id),
            }),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        self.simulate_latency().await;

        self.containers.write().await.remove(id);
        Ok(())
    }

    async fn list_containers(&self, label_selector: &str) -> Result<Vec<ContainerInfo>> {
        self.simulate_latency().await;

        Ok(self
            .containers
            .read()
            .await
            .values()
            .filter(|c| c.state == SimState::Running && Self::matches(&c.info, label_selector))
            .map(|c| c.info.clone())
            .collect())
    }
}
