use login_cluster::ClusterError;
use thiserror::Error;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the queue contract.
///
/// Duplicates and a full queue are not errors; `offer` reports them as `false`.
#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("No handler registered for task type: {0}")]
    HandlerNotRegistered(String),

    #[error("Handler already registered for task type: {0}")]
    DuplicateHandler(String),

    #[error("Queue operation interrupted")]
    Interrupted,

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Invalid configuration for '{key}': {reason}")]
    Config { key: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl QueueError {
    pub fn invalid_task(msg: impl Into<String>) -> Self {
        Self::InvalidTask(msg.into())
    }
}

/// Handler outcome - determines retry behavior
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Retried while attempts remain
    #[error("Retryable error: {0}")]
    Retryable(String),

    /// Fails the task immediately
    #[error("Permanent error: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Retryable(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

