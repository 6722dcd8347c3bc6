//! Engine configuration.

use crate::deployment::manager::RuntimePolicy;
use crate::error::{Result, StackdError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Persistent configuration for the deployment engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool size for batch operations.
    pub max_concurrent_operations: usize,
    /// Deadline for a single container runtime call, in seconds.
    pub runtime_timeout_secs: u64,
    /// Additional attempts after a retryable runtime failure.
    pub runtime_retries: u32,
    /// Quota reservation lease lifetime, in seconds.
    pub reservation_ttl_secs: u64,
    /// SQLite database holding tenant and deployment records.
    pub state_db_path: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 5,
            runtime_timeout_secs: 30,
            runtime_retries: 2,
            reservation_ttl_secs: 120,
            state_db_path: "stackd/state.db".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to read config: {}", e),
        })?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| StackdError::InvalidConfig {
                reason: format!("Failed to parse config: {}", e),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StackdError::InvalidConfig {
                reason: format!("Failed to create config dir: {}", e),
            })?;
        }
        let content = serde_json::to_string_pretty(self).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to serialize config: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| StackdError::InvalidConfig {
            reason: format!("Failed to write config: {}", e),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_operations == 0 {
            return Err(StackdError::InvalidConfig {
                reason: "max_concurrent_operations must be at least 1".to_string(),
            });
        }
        if self.reservation_ttl_secs == 0 {
            return Err(StackdError::InvalidConfig {
                reason: "reservation_ttl_secs must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn state_db_path(&self) -> PathBuf {
        PathBuf::from(&self.state_db_path)
    }

    pub fn runtime_policy(&self) -> RuntimePolicy {
        RuntimePolicy {
            timeout: Duration::from_secs(self.runtime_timeout_secs),
            retries: self.runtime_retries,
        }
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_secs(self.reservation_ttl_secs)
    }
}
