//! Docker Compose file format types.
//!
//! Types matching the subset of the Compose specification v3 that the
//! deployment engine inspects.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Root structure of a docker-compose.yml file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComposeFile {
    /// Compose file format version (e.g., "3", "3.8"). Absent means "3".
    #[serde(default)]
    pub version: String,

    /// Services to be created
    #[serde(default)]
    pub services: HashMap<String, Service>,

    /// Named volumes (passed through to the runtime, not inspected)
    #[serde(default)]
    pub volumes: HashMap<String, serde_yaml::Value>,

    /// Networks (passed through to the runtime, not inspected)
    #[serde(default)]
    pub networks: HashMap<String, serde_yaml::Value>,
}

/// A service in a docker-compose file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Service {
    /// Container image to use
    #[serde(default)]
    pub image: String,

    /// Port mappings (e.g., ["8080:80", "443:443"])
    #[serde(default)]
    pub ports: Vec<String>,

    /// Environment variables
    #[serde(default)]
    pub environment: Environment,

    /// Volume mounts (e.g., ["./data:/data", "db:/var/lib/db"])
    #[serde(default)]
    pub volumes: Vec<String>,

    /// Services this service depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Metadata labels
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Deployment configuration (Compose v3)
    #[serde(default)]
    pub deploy: Option<DeployConfig>,
}

impl Service {
    /// Number of containers this service expects the runtime to create.
    pub fn container_count(&self) -> u32 {
        self.deploy.as_ref().and_then(|d| d.replicas).unwrap_or(1)
    }
}

/// Environment variables can be specified as a map or list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    /// Environment as key-value map
    Map(HashMap<String, String>),
    /// Environment as list of KEY=value strings
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(HashMap::new())
    }
}

impl Environment {
    /// Convert environment to a HashMap regardless of input format.
    pub fn to_map(&self) -> HashMap<String, String> {
        match self {
            Environment::Map(map) => map.clone(),
            Environment::List(list) => list
                .iter()
                .filter_map(|s| {
                    let parts: Vec<&str> = s.splitn(2, '=').collect();
                    if parts.len() == 2 {
                        Some((parts[0].to_string(), parts[1].to_string()))
                    } else {
                        None
                    }
                })
                .collect(),
        }
    }
}

/// Deployment configuration (Compose v3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Number of container replicas for this service
    #[serde(default)]
    pub replicas: Option<u32>,
}

/// Validated summary of a compose manifest.
///
/// Produced by [`ComposeParser::validate`](super::ComposeParser::validate) for
/// quota arithmetic; ephemeral, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    /// Declared schema version (defaulted to "3" when absent)
    pub version: String,

    /// Service name -> expected container count, in stable order
    pub services: BTreeMap<String, u32>,
}

impl ManifestDescriptor {
    /// Total number of containers the manifest declares.
    ///
    /// Saturates instead of wrapping, so absurd replica counts surface as a
    /// quota rejection rather than an arithmetic wraparound.
    pub fn total_containers(&self) -> u32 {
        self.services.values().fold(0u32, |total, count| total.saturating_add(*count))
    }
}
