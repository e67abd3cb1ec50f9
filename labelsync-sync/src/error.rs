//! Error types for labelsync-sync.

use thiserror::Error;

use labelsync_core::{ConfigError, ProviderIdError};

/// Failure reported by a node, compute, or event collaborator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The requested object does not exist.
    #[error("{what} not found")]
    NotFound { what: String },

    /// The remote API rejected the request or could not be reached.
    #[error("{message}")]
    Api {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The call did not finish before the pass deadline.
    #[error("{operation} exceeded the pass deadline")]
    DeadlineExceeded { operation: &'static str },

    /// The pass was cancelled while the call was in flight.
    #[error("{operation} was cancelled")]
    Cancelled { operation: &'static str },
}

impl ClientError {
    /// Wrap an underlying client error with a message.
    pub fn api(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ClientError::Api {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// An API failure with no underlying error value.
    pub fn message(message: impl Into<String>) -> Self {
        ClientError::Api {
            message: message.into(),
            source: None,
        }
    }
}

/// All errors that abort a reconciliation pass.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Options failed validation; retried on the next trigger.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// The node's provider ID does not identify a compute resource.
    #[error("node {node}: invalid provider ID: {source}")]
    InvalidProviderId {
        node: String,
        #[source]
        source: ProviderIdError,
    },

    /// Nodes could not be listed, so no pass ran.
    #[error("listing nodes failed: {0}")]
    ListNodes(#[source] ClientError),

    /// A collaborator call failed; the node stays due.
    #[error("node {node}: {operation} failed: {source}")]
    Collaborator {
        node: String,
        operation: String,
        #[source]
        source: ClientError,
    },
}

impl SyncError {
    /// Node the failed pass belonged to, when the error is node-scoped.
    pub fn node(&self) -> Option<&str> {
        match self {
            SyncError::InvalidConfig(_) | SyncError::ListNodes(_) => None,
            SyncError::InvalidProviderId { node, .. } | SyncError::Collaborator { node, .. } => {
                Some(node)
            }
        }
    }
}

/// Convenience constructor for [`SyncError::Collaborator`].
pub(crate) fn collab_err(
    node: &str,
    operation: impl Into<String>,
) -> impl FnOnce(ClientError) -> SyncError + '_ {
    let operation = operation.into();
    move |source| SyncError::Collaborator {
        node: node.to_owned(),
        operation,
        source,
    }
}
