use thiserror::Error;

/// Result type for cluster substrate operations
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Infrastructure errors raised by the clustered substrate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("Cluster runtime is not running")]
    NotRunning,

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Probe failed for member {member}: {reason}")]
    ProbeFailed { member: String, reason: String },

    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Create an unreachable error
    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::Unreachable(msg.into())
    }

    /// Whether the failure is a transient transport condition worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_) | Self::ProbeFailed { .. }
        )
    }
}
