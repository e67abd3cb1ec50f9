//! Collaborator seams: node access, compute resources, conflict events.
//!
//! The engine only ever sees these traits. Implementations backed by the
//! Kubernetes API and Azure Resource Manager live in `labelsync-daemon`;
//! in-memory fakes live in [`crate::testing`].

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use labelsync_core::{LabelMap, ResourceId, TagMap};

use crate::conflict::Conflict;
use crate::error::ClientError;

/// The parts of a Kubernetes node a pass reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeSnapshot {
    pub name: String,
    pub uid: Option<String>,
    pub provider_id: Option<String>,
    pub labels: LabelMap,
}

/// Read nodes, list nodes, and write label merge patches.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClientError>;

    /// Apply a JSON merge patch of the shape `{"metadata":{"labels":{…}}}`.
    async fn patch_labels(&self, name: &str, patch: &serde_json::Value) -> Result<(), ClientError>;

    async fn list_nodes(&self) -> Result<Vec<String>, ClientError>;
}

/// A compute resource handle fetched for a single pass.
///
/// Virtual machines and scale sets implement the same contract, so the
/// planner never needs to know which one it is looking at.
#[async_trait]
pub trait ComputeResource: Send + Sync {
    fn id(&self) -> &ResourceId;

    fn tags(&self) -> &TagMap;

    /// Replace the local tag set; nothing is sent until [`Self::commit`].
    fn replace_tags(&mut self, tags: TagMap);

    /// Write the full local tag set back and wait for the update to settle.
    async fn commit(&mut self) -> Result<(), ClientError>;
}

/// Fetches fresh compute resource handles.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    async fn fetch(&self, id: &ResourceId) -> Result<Box<dyn ComputeResource>, ClientError>;
}

/// Sink for conflict notifications attributed to a node.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn conflict(&self, node: &NodeSnapshot, conflict: &Conflict) -> Result<(), ClientError>;
}

/// Deadline and cancellation shared by every collaborator call in one pass.
#[derive(Debug, Clone)]
pub struct PassContext {
    deadline: Instant,
    cancel: CancellationToken,
}

impl PassContext {
    pub fn new(timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            cancel,
        }
    }

    /// A context with its own, never-triggered cancellation token.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, CancellationToken::new())
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `call`, failing it if the deadline passes or the pass is cancelled.
    ///
    /// Dropping the call future on either condition cancels the in-flight
    /// request along with anything it was polling.
    pub async fn bound<T, F>(&self, operation: &'static str, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled { operation }),
            result = tokio::time::timeout_at(self.deadline, call) => {
                result.unwrap_or(Err(ClientError::DeadlineExceeded { operation }))
            }
        }
    }
}
