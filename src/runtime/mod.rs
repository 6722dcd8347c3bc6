//! Container runtime collaborator abstraction.
//!
//! The engine drives any runtime satisfying the [`ContainerRuntime`]
//! capability set: create a compose stack, stop/remove single containers,
//! and list containers by label. A Docker binding lives outside this crate;
//! [`SimulatedRuntime`] ships here for tests and local development.

use crate::compose::ComposeFile;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod simulated;

pub use simulated::SimulatedRuntime;

/// Label every container of a deployment carries, valued with the project
/// name. Preserved for docker-compose compatibility.
pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";

/// Build the label selector matching all containers of one project.
pub fn project_selector(project: &str) -> String {
    format!("{}={}", COMPOSE_PROJECT_LABEL, project)
}

/// A container known to the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Runtime-assigned container id
    pub id: String,

    /// Container name
    pub name: String,

    /// Container labels
    pub labels: HashMap<String, String>,
}

/// Container runtime capability set.
///
/// Implementations are expected to block/suspend; every call made by the
/// engine carries a deadline on the caller's side.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Bring up the stack described by a compose manifest under a project
    /// name, labeling every created container with
    /// [`COMPOSE_PROJECT_LABEL`]` = project`.
    async fn create_stack(
        &self,
        compose: &ComposeFile,
        project: &str,
        env_vars: &HashMap<String, String>,
    ) -> Result<Vec<ContainerInfo>>;

    /// Stop a running container. Stopping an already-stopped container
    /// succeeds.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Remove a container. The container must be stopped.
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// List containers matching a `label` or `label=value` selector.
    async fn list_containers(&self, label_selector: &str) -> Result<Vec<ContainerInfo>>;
}
