//! Common error types for PeerFleet components.

use thiserror::Error;

/// Result type alias for PeerFleet operations
pub type Result<T> = std::result::Result<T, PeerFleetError>;

/// Common errors across PeerFleet components
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PeerFleetError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Partition path collides with an access point of different ownership
    #[error("Allocation error at {path}: {reason}")]
    Allocation { path: String, reason: String },

    /// Cluster process wired or started without its node dependency
    #[error("Dependency violation for peer {index}: {reason}")]
    DependencyViolation { index: u32, reason: String },

    /// Discovery name already bound to a different unit
    #[error("Discovery conflict: {name} is bound to {bound_to}, requested by {requested_by}")]
    DiscoveryConflict {
        name: String,
        bound_to: String,
        requested_by: String,
    },

    /// Liveness probe exhausted its retries
    #[error("Health probe failure for peer {index}: {consecutive_failures} consecutive failures")]
    HealthProbe {
        index: u32,
        consecutive_failures: u32,
    },

    /// Illegal lifecycle transition
    #[error("Invalid transition for peer {index}: {from} -> {to}")]
    InvalidTransition { index: u32, from: String, to: String },

    /// Shared storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Discovery backend error
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Redis connection/operation error
    #[error("Redis error: {0}")]
    Redis(String),

    /// Unknown peer index
    #[error("Peer not found: {0}")]
    PeerNotFound(u32),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PeerFleetError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Allocation { .. } => 409,
            Self::DependencyViolation { .. } => 422,
            Self::DiscoveryConflict { .. } => 409,
            Self::HealthProbe { .. } => 503,
            Self::InvalidTransition { .. } => 409,
            Self::Storage(_) => 503,
            Self::Discovery(_) => 503,
            Self::Redis(_) => 503,
            Self::PeerNotFound(_) => 404,
            Self::InvalidInput(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Discovery(_) | Self::Redis(_)
        )
    }

    /// Returns true if this error fails a single peer unit without
    /// affecting its siblings
    pub fn is_unit_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. }
                | Self::DependencyViolation { .. }
                | Self::DiscoveryConflict { .. }
        )
    }
}
