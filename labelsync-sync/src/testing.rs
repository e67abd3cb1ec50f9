//! In-memory collaborators for tests.
//!
//! Enabled for this crate's own tests and, through the `test-util` feature,
//! for downstream crates.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use labelsync_core::{LabelMap, ResourceId, ResourceKind, TagMap};

use crate::client::{ComputeProvider, ComputeResource, EventRecorder, NodeClient, NodeSnapshot};
use crate::conflict::Conflict;
use crate::error::ClientError;
use crate::scheduler::Clock;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub const SUBSCRIPTION: &str = "00000000-0000-0000-0000-000000000000";

pub fn vm_id(resource_group: &str, name: &str) -> ResourceId {
    ResourceId {
        subscription_id: SUBSCRIPTION.to_owned(),
        resource_group: resource_group.to_owned(),
        kind: ResourceKind::VirtualMachine,
        name: name.to_owned(),
    }
}

pub fn provider_id(id: &ResourceId) -> String {
    format!("azure://{}", id.arm_path())
}

pub fn node(name: &str, resource: &ResourceId, labels: &[(&str, &str)]) -> NodeSnapshot {
    NodeSnapshot {
        name: name.to_owned(),
        uid: Some(format!("uid-{name}")),
        provider_id: Some(provider_id(resource)),
        labels: map(labels),
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

/// Node store that applies label merge patches in place.
#[derive(Debug, Default)]
pub struct FakeNodes {
    nodes: Mutex<BTreeMap<String, NodeSnapshot>>,
    patches: Mutex<Vec<(String, serde_json::Value)>>,
    calls: AtomicUsize,
    fail: Mutex<Option<&'static str>>,
}

impl FakeNodes {
    pub fn insert(&self, node: NodeSnapshot) {
        lock(&self.nodes).insert(node.name.clone(), node);
    }

    pub fn labels(&self, name: &str) -> LabelMap {
        lock(&self.nodes)
            .get(name)
            .map(|n| n.labels.clone())
            .unwrap_or_default()
    }

    pub fn patches(&self) -> Vec<(String, serde_json::Value)> {
        lock(&self.patches).clone()
    }

    /// Total calls made through [`NodeClient`].
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Make `operation` (`"get"`, `"patch"` or `"list"`) fail from now on.
    pub fn fail_on(&self, operation: &'static str) {
        *lock(&self.fail) = Some(operation);
    }

    fn enter(&self, operation: &'static str) -> Result<(), ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail) == Some(operation) {
            return Err(ClientError::message(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl NodeClient for FakeNodes {
    async fn get_node(&self, name: &str) -> Result<NodeSnapshot, ClientError> {
        self.enter("get")?;
        lock(&self.nodes)
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                what: format!("node {name}"),
            })
    }

    async fn patch_labels(&self, name: &str, patch: &serde_json::Value) -> Result<(), ClientError> {
        self.enter("patch")?;
        let mut nodes = lock(&self.nodes);
        let node = nodes.get_mut(name).ok_or_else(|| ClientError::NotFound {
            what: format!("node {name}"),
        })?;
        if let Some(labels) = patch
            .pointer("/metadata/labels")
            .and_then(serde_json::Value::as_object)
        {
            for (key, value) in labels {
                match value.as_str() {
                    Some(v) => {
                        node.labels.insert(key.clone(), v.to_owned());
                    }
                    None => {
                        node.labels.remove(key);
                    }
                }
            }
        }
        lock(&self.patches).push((name.to_owned(), patch.clone()));
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<String>, ClientError> {
        self.enter("list")?;
        Ok(lock(&self.nodes).keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Compute
// ---------------------------------------------------------------------------

type TagStore = Arc<Mutex<HashMap<ResourceId, TagMap>>>;

/// Compute provider over a shared tag store.
#[derive(Debug, Default)]
pub struct FakeCompute {
    store: TagStore,
    fetches: AtomicUsize,
    commits: Arc<AtomicUsize>,
    fail_commit: Arc<Mutex<bool>>,
    fetch_delay: Mutex<Option<Duration>>,
}

impl FakeCompute {
    pub fn insert(&self, id: ResourceId, tags: TagMap) {
        lock(&self.store).insert(id, tags);
    }

    pub fn tags(&self, id: &ResourceId) -> TagMap {
        lock(&self.store).get(id).cloned().unwrap_or_default()
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self) {
        *lock(&self.fail_commit) = true;
    }

    /// Delay every fetch by `delay` (tokio time, so paused clocks apply).
    pub fn delay_fetches(&self, delay: Duration) {
        *lock(&self.fetch_delay) = Some(delay);
    }
}

#[async_trait]
impl ComputeProvider for FakeCompute {
    async fn fetch(&self, id: &ResourceId) -> Result<Box<dyn ComputeResource>, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let tags = lock(&self.store)
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound {
                what: format!("compute resource {id}"),
            })?;
        Ok(Box::new(FakeResource {
            id: id.clone(),
            tags,
            store: Arc::clone(&self.store),
            commits: Arc::clone(&self.commits),
            fail_commit: Arc::clone(&self.fail_commit),
        }))
    }
}

/// Handle returned by [`FakeCompute::fetch`].
#[derive(Debug)]
pub struct FakeResource {
    id: ResourceId,
    tags: TagMap,
    store: TagStore,
    commits: Arc<AtomicUsize>,
    fail_commit: Arc<Mutex<bool>>,
}

#[async_trait]
impl ComputeResource for FakeResource {
    fn id(&self) -> &ResourceId {
        &self.id
    }

    fn tags(&self) -> &TagMap {
        &self.tags
    }

    fn replace_tags(&mut self, tags: TagMap) {
        self.tags = tags;
    }

    async fn commit(&mut self) -> Result<(), ClientError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if *lock(&self.fail_commit) {
            return Err(ClientError::message("injected commit failure"));
        }
        lock(&self.store).insert(self.id.clone(), self.tags.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Records every published conflict.
#[derive(Debug, Default)]
pub struct RecordingEvents {
    events: Mutex<Vec<(String, Conflict)>>,
    fail: Mutex<bool>,
}

impl RecordingEvents {
    pub fn recorded(&self) -> Vec<(String, Conflict)> {
        lock(&self.events).clone()
    }

    pub fn fail_all(&self) {
        *lock(&self.fail) = true;
    }
}

#[async_trait]
impl EventRecorder for RecordingEvents {
    async fn conflict(&self, node: &NodeSnapshot, conflict: &Conflict) -> Result<(), ClientError> {
        if *lock(&self.fail) {
            return Err(ClientError::message("injected event failure"));
        }
        lock(&self.events).push((node.name.clone(), conflict.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc::now()),
        }
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }

    pub fn rewind(&self, by: Duration) {
        *lock(&self.now) -= chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}
