//! Error types for stackd.
//!
//! All errors use `thiserror` for ergonomic error handling and proper error chains.

use thiserror::Error;

/// Result type alias for stackd operations.
pub type Result<T> = std::result::Result<T, StackdError>;

/// Main error type for stackd.
#[derive(Error, Debug)]
pub enum StackdError {
    // Manifest validation errors
    #[error("Compose parse error: {reason}")]
    ComposeParse { reason: String },

    #[error("Unsupported compose version: {version} (only v3 is supported)")]
    UnsupportedComposeVersion { version: String },

    #[error("Compose file has no services defined")]
    MissingServices,

    // Tenant errors
    #[error("Tenant not found: {slug}")]
    TenantNotFound { slug: String },

    #[error("Tenant already exists: {slug}")]
    DuplicateTenant { slug: String },

    #[error("Tenant is not active: {slug}")]
    TenantInactive { slug: String },

    #[error("Tenant {slug} still has {count} live deployment(s); remove them first")]
    TenantHasActiveDeployments { slug: String, count: usize },

    // Quota errors
    #[error("Quota exceeded for tenant {slug}: {reason}")]
    QuotaExceeded { slug: String, reason: String },

    // Deployment errors
    #[error("Deployment not found: {project}")]
    DeploymentNotFound { project: String },

    #[error("Deployment already exists: {project}")]
    DuplicateDeployment { project: String },

    #[error("Invalid state transition for {project}: {from} -> {to}")]
    InvalidTransition { project: String, from: String, to: String },

    // Runtime collaborator errors
    #[error("Runtime call timed out: {operation}")]
    RuntimeTimeout { operation: String },

    #[error("Container runtime unavailable: {reason}")]
    RuntimeUnavailable { reason: String },

    // State consistency errors
    #[error("Tracker/runtime state inconsistency: {reason}")]
    InternalInconsistency { reason: String },

    // Orchestration errors
    #[error("Operation cancelled before dispatch: {unit}")]
    OperationCancelled { unit: String },

    // Persistence errors
    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StackdError {
    /// Create an Internal error from a message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the caller may retry the failed call after a backoff.
    ///
    /// Only transient runtime failures qualify; validation, quota, and
    /// not-found errors stay failed until external state changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RuntimeTimeout { .. } | Self::RuntimeUnavailable { .. })
    }
}
