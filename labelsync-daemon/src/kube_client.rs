//! Kubernetes-backed node and event collaborators.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};

use labelsync_sync::{ClientError, Conflict, EventRecorder, NodeClient, NodeSnapshot};

/// Event reason attached to every conflict notification.
pub const CONFLICT_REASON: &str = "ConflictingTagLabelValues";
/// Controller name reported on events.
pub const REPORTER: &str = "labelsync";

/// Map a kube error, turning 404 into [`ClientError::NotFound`].
pub(crate) fn kube_err(what: impl Into<String>, err: kube::Error) -> ClientError {
    let what = what.into();
    match err {
        kube::Error::Api(ref resp) if resp.code == 404 => ClientError::NotFound { what },
        err => ClientError::api(format!("kubernetes request for {what} failed"), err),
    }
}

pub fn snapshot(node: &Node) -> NodeSnapshot {
    NodeSnapshot {
        name: node.name_any(),
        uid: node.metadata.uid.clone(),
        provider_id: node.spec.as_ref().and_then(|s| s.provider_id.clone()),
        labels: node.labels().clone(),
    }
}

/// Nodes through the cluster API.
#[derive(Clone)]
pub struct KubeNodes {
    api: Api<Node>,
}

impl KubeNodes {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl NodeClient for KubeNodes {
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClientError> {
        let node = self
            .api
            .get(name)
            .await
            .map_err(|e| kube_err(format!("node {name}"), e))?;
        Ok(snapshot(&node))
    }

    async fn patch_labels(&self, name: &str, patch: &serde_json::Value) -> Result<(), ClientError> {
        self.api
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| kube_err(format!("node {name}"), e))?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<String>, ClientError> {
        let list = self
            .api
            .list_metadata(&ListParams::default())
            .await
            .map_err(|e| kube_err("node list", e))?;
        Ok(list.items.into_iter().filter_map(|n| n.metadata.name).collect())
    }
}

/// Publishes conflicts as `Warning` events on the node.
#[derive(Clone)]
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: REPORTER.into(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn conflict(&self, node: &NodeSnapshot, conflict: &Conflict) -> Result<(), ClientError> {
        self.recorder
            .publish(&conflict_event(conflict), &node_reference(node))
            .await
            .map_err(|e| kube_err(format!("event on node {}", node.name), e))
    }
}

pub fn conflict_event(conflict: &Conflict) -> Event {
    Event {
        type_: EventType::Warning,
        reason: CONFLICT_REASON.into(),
        note: Some(conflict.message()),
        action: "Reconcile".into(),
        secondary: None,
    }
}

/// Nodes are cluster-scoped, so the reference carries no namespace.
pub fn node_reference(node: &NodeSnapshot) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".into()),
        kind: Some("Node".into()),
        name: Some(node.name.clone()),
        uid: node.uid.clone(),
        ..ObjectReference::default()
    }
}
