//! Custom error types for muo.

use thiserror::Error;

/// Errors that can occur while keeping nodes and notifying upgrade states.
#[derive(Error, Debug)]
pub enum MuoError {
    #[error("Kubernetes API error: {0}")]
    KubernetesApi(String),

    #[error("No UpgradeConfig found in namespace {0}")]
    UpgradeConfigNotFound(String),

    #[error("Expected a single UpgradeConfig in namespace {namespace}, found {count}")]
    MultipleUpgradeConfigs { namespace: String, count: usize },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Update of {0} rejected: object was modified concurrently")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("[{0}] drain error: {1}")]
    Drain(String, String),

    #[error("Notification for state {0} failed: {1}")]
    Notification(String, String),

    #[error("Metrics query failed: {0}")]
    Metrics(String),

    #[error("Deadline exceeded after {0}s")]
    DeadlineExceeded(u64),
}

impl MuoError {
    /// Wrap a Kubernetes client error, mapping optimistic-concurrency rejections to [`MuoError::Conflict`].
    pub fn kube(object: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict(object.to_string()),
            other => Self::KubernetesApi(format!("{object}: {other}")),
        }
    }

    /// Create a drain error for the named strategy.
    pub fn drain<E: std::fmt::Display>(strategy: &str, err: E) -> Self {
        Self::Drain(strategy.to_string(), err.to_string())
    }

    /// Returns true if this error is transient and should be retried soon.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::KubernetesApi(_)
                | Self::Conflict(_)
                | Self::Notification(_, _)
                | Self::Metrics(_)
                | Self::DeadlineExceeded(_)
        )
    }
}
