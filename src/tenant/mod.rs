//! Tenant domain types and registry.

pub mod registry;

pub use registry::TenantRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Resource limits for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantQuotas {
    /// Maximum number of live deployments
    pub max_deployments: u32,

    /// Maximum number of containers across all deployments
    pub max_containers: u32,

    /// CPU core limit (advisory, not enforced by the quota arithmetic)
    #[serde(default)]
    pub max_cpu: Option<f64>,

    /// Memory limit in MB (advisory, not enforced by the quota arithmetic)
    #[serde(default)]
    pub max_memory_mb: Option<u64>,
}

impl Default for TenantQuotas {
    fn default() -> Self {
        Self { max_deployments: 10, max_containers: 50, max_cpu: None, max_memory_mb: None }
    }
}

/// An isolated namespace with its own resource quotas and deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Stable unique identifier, immutable after creation
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Unique slug, immutable after creation; namespaces project names
    pub slug: String,

    /// Free-form description
    pub description: String,

    /// Inactive tenants cannot receive new deployments
    pub active: bool,

    /// Resource limits
    pub quotas: TenantQuotas,

    /// Free-form configuration
    #[serde(default)]
    pub config: HashMap<String, serde_json::Value>,

    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp; never decreases and never precedes created_at
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant with a fresh id.
    pub fn new(name: &str, slug: &str, description: &str, quotas: TenantQuotas) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: slug.to_string(),
            description: description.to_string(),
            active: true,
            quotas,
            config: HashMap::new(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance the update timestamp, keeping it monotonically non-decreasing.
    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now().max(self.updated_at);
    }
}

/// Partial update for a tenant.
///
/// Identity fields (`id`, `slug`) are deliberately not representable here;
/// every other field is an explicit named option. `None` leaves the field
/// unchanged.
#[derive(Debug, Clone, Default)]
pub struct TenantUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
    pub max_deployments: Option<u32>,
    pub max_containers: Option<u32>,
    pub max_cpu: Option<Option<f64>>,
    pub max_memory_mb: Option<Option<u64>>,
    pub config: Option<HashMap<String, serde_json::Value>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl TenantUpdate {
    pub(crate) fn apply(&self, tenant: &mut Tenant) {
        if let Some(name) = &self.name {
            tenant.name = name.clone();
        }
        if let Some(description) = &self.description {
            tenant.description = description.clone();
        }
        if let Some(active) = self.active {
            tenant.active = active;
        }
        if let Some(max_deployments) = self.max_deployments {
            tenant.quotas.max_deployments = max_deployments;
        }
        if let Some(max_containers) = self.max_containers {
            tenant.quotas.max_containers = max_containers;
        }
        if let Some(max_cpu) = self.max_cpu {
            tenant.quotas.max_cpu = max_cpu;
        }
        if let Some(max_memory_mb) = self.max_memory_mb {
            tenant.quotas.max_memory_mb = max_memory_mb;
        }
        if let Some(config) = &self.config {
            tenant.config = config.clone();
        }
        if let Some(metadata) = &self.metadata {
            tenant.metadata = metadata.clone();
        }
        tenant.touch();
    }
}
