//! Deployment domain types, lifecycle state machine, tracker, and manager.

pub mod manager;
pub mod tracker;

pub use manager::{DeploymentManager, RuntimePolicy};
pub use tracker::{DeploymentTracker, TenantUsage};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a deployment.
///
/// Transitions are monotonic within an operation's critical section; the
/// allowed edges are encoded in [`DeploymentState::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Record created, manifest validated, quota reserved; runtime create
    /// not yet confirmed.
    Pending,
    /// Runtime confirmed the stack is up; container ids populated.
    Deployed,
    /// Stop requested.
    Stopping,
    /// Stop confirmed; containers remain attached.
    Stopped,
    /// Teardown requested.
    Removing,
    /// Teardown confirmed; container list cleared, record purgeable.
    Removed,
    /// Unrecoverable runtime failure; recoverable only via explicit
    /// remove-then-redeploy.
    Failed,
}

impl DeploymentState {
    /// Parse state from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "deployed" => Some(Self::Deployed),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "removing" => Some(Self::Removing),
            "removed" => Some(Self::Removed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deployed => "deployed",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Removing => "removing",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }

    /// Whether a transition from `self` to `to` is allowed.
    pub fn can_transition(&self, to: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (*self, to),
            (Pending, Deployed)
                | (Pending, Failed)
                // A crash can strand a record in Pending across a restart;
                // removal is the recovery path.
                | (Pending, Removing)
                | (Deployed, Stopping)
                | (Deployed, Removing)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Removing)
                | (Removing, Removed)
                | (Removing, Failed)
                | (Failed, Removing)
        )
    }

    /// Terminal states consume no tenant quota.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative record of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unique project name, conventionally `{tenant_slug}_{name}`
    pub project_name: String,

    /// Owning tenant slug
    pub tenant_slug: String,

    /// Raw manifest the deployment was created from
    pub manifest_source: String,

    /// Current lifecycle state
    pub state: DeploymentState,

    /// Ids of the containers currently attached, in creation order
    pub containers: Vec<String>,

    /// Cause of the last unrecoverable failure, if any
    pub error: Option<String>,

    /// Tracker/runtime inconsistency warnings attached for diagnostics
    #[serde(default)]
    pub warnings: Vec<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last state transition timestamp
    pub updated_at: DateTime<Utc>,
}

impl DeploymentRecord {
    /// Create a new record in `Pending` state.
    pub fn new(project_name: &str, tenant_slug: &str, manifest_source: &str) -> Self {
        let now = Utc::now();
        Self {
            project_name: project_name.to_string(),
            tenant_slug: tenant_slug.to_string(),
            manifest_source: manifest_source.to_string(),
            state: DeploymentState::Pending,
            containers: Vec::new(),
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive the project name for a tenant-scoped deployment.
pub fn project_name(tenant_slug: &str, name: &str) -> String {
    format!("{}_{}", tenant_slug, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentState::*;

    #[test]
    fn test_state_round_trip() {
        for state in [Pending, Deployed, Stopping, Stopped, Removing, Removed, Failed] {
            assert_eq!(DeploymentState::parse(state.as_str()), Some(state));
        }
        assert_eq!(DeploymentState::parse("bogus"), None);
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(Pending.can_transition(Deployed));
        assert!(Deployed.can_transition(Stopping));
        assert!(Stopping.can_transition(Stopped));
        assert!(Stopped.can_transition(Removing));
        assert!(Removing.can_transition(Removed));
    }

    #[test]
    fn test_failure_edges() {
        assert!(Pending.can_transition(Failed));
        assert!(Stopping.can_transition(Failed));
        assert!(Removing.can_transition(Failed));
        // No automatic retry: failure only recovers through removal.
        assert!(Failed.can_transition(Removing));
        assert!(!Failed.can_transition(Deployed));
        assert!(!Failed.can_transition(Pending));
    }

    #[test]
    fn test_removed_is_terminal() {
        for to in [Pending, Deployed, Stopping, Stopped, Removing, Failed] {
            assert!(!Removed.can_transition(to));
        }
        assert!(Removed.is_terminal());
        assert!(!Failed.is_terminal());
    }

    #[test]
    fn test_no_skipping_stop() {
        assert!(!Deployed.can_transition(Stopped));
        assert!(!Stopping.can_transition(Removed));
    }

    #[test]
    fn test_project_name_convention() {
        assert_eq!(project_name("acme", "app1"), "acme_app1");
    }
}
