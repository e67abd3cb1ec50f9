//! One reconciliation pass for one node.
//!
//! Pass order:
//! 1. scheduler admission (skipped entirely in dry-run)
//! 2. read node, resolve provider ID
//! 3. resource-group filter
//! 4. fetch the compute resource
//! 5. plan per sync direction, both sides from the same snapshot
//! 6. publish conflicts, patch labels, commit tags
//! 7. mark the node fresh
//!
//! Any collaborator failure returns early and leaves the node due.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use labelsync_core::{parse_provider_id, ConfigOptions, ResourceId};

use crate::client::{ComputeProvider, EventRecorder, NodeClient, NodeSnapshot, PassContext};
use crate::conflict::Conflict;
use crate::error::{collab_err, SyncError};
use crate::planner::{plan_labels_from_tags, plan_tags_from_labels, LabelPlan, TagPlan};
use crate::scheduler::{format_age, Admission, SyncTracker};

/// Whether a pass writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassMode {
    #[default]
    Apply,
    /// Read and plan only: no writes, no events, no scheduler bookkeeping.
    DryRun,
}

/// How a pass ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PassStatus {
    /// Synced within `min_sync_period`; nothing was read.
    NotDue { last_synced: DateTime<Utc> },
    /// Another pass for the node is still running.
    InFlight,
    /// The node's resource group is excluded by the filter.
    Filtered { resource_group: String },
    Synced,
}

/// One write a pass performed (or would perform in dry-run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "write", rename_all = "kebab-case")]
pub enum WriteResult {
    LabelsPatched { count: usize },
    TagsUpdated { count: usize },
    WouldPatchLabels { count: usize },
    WouldUpdateTags { count: usize },
}

/// Summary of one node's pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeSyncResult {
    pub node_name: String,
    pub resource: Option<ResourceId>,
    pub status: PassStatus,
    pub writes: Vec<WriteResult>,
    pub label_plan: Option<LabelPlan>,
    pub tag_plan: Option<TagPlan>,
}

impl NodeSyncResult {
    fn new(node_name: &str, status: PassStatus) -> Self {
        Self {
            node_name: node_name.to_owned(),
            resource: None,
            status,
            writes: Vec::new(),
            label_plan: None,
            tag_plan: None,
        }
    }

    /// Conflicts from both plans, tag → label first.
    pub fn conflicts(&self) -> impl Iterator<Item = &Conflict> {
        self.label_plan
            .iter()
            .flat_map(|p| p.conflicts.iter())
            .chain(self.tag_plan.iter().flat_map(|p| p.conflicts.iter()))
    }

    pub fn changed(&self) -> bool {
        !self.writes.is_empty()
    }
}

/// Drives passes against the node, compute and event collaborators.
#[derive(Clone)]
pub struct Reconciler {
    nodes: Arc<dyn NodeClient>,
    compute: Arc<dyn ComputeProvider>,
    events: Arc<dyn EventRecorder>,
    tracker: Arc<SyncTracker>,
}

impl Reconciler {
    pub fn new(
        nodes: Arc<dyn NodeClient>,
        compute: Arc<dyn ComputeProvider>,
        events: Arc<dyn EventRecorder>,
        tracker: Arc<SyncTracker>,
    ) -> Self {
        Self {
            nodes,
            compute,
            events,
            tracker,
        }
    }

    pub fn tracker(&self) -> &Arc<SyncTracker> {
        &self.tracker
    }

    pub fn nodes(&self) -> &Arc<dyn NodeClient> {
        &self.nodes
    }

    /// Run one pass for `name`.
    pub async fn reconcile_node(
        &self,
        name: &str,
        cfg: &ConfigOptions,
        ctx: &PassContext,
        mode: PassMode,
    ) -> Result<NodeSyncResult, SyncError> {
        let ticket = match mode {
            PassMode::DryRun => None,
            PassMode::Apply => match self.tracker.try_begin(name, cfg.min_sync_period) {
                Admission::Run(ticket) => Some(ticket),
                Admission::Fresh { last_synced } => {
                    tracing::debug!(
                        node = %name,
                        age = %format_age(last_synced, self.tracker.now()),
                        "not due, skipping"
                    );
                    return Ok(NodeSyncResult::new(
                        name,
                        PassStatus::NotDue { last_synced },
                    ));
                }
                Admission::InFlight => {
                    tracing::debug!(node = %name, "pass already in flight, skipping");
                    return Ok(NodeSyncResult::new(name, PassStatus::InFlight));
                }
            },
        };

        let node = ctx
            .bound("get node", self.nodes.get_node(name))
            .await
            .map_err(collab_err(name, "get node"))?;

        let resource = parse_provider_id(node.provider_id.as_deref().unwrap_or_default())
            .map_err(|source| SyncError::InvalidProviderId {
                node: name.to_owned(),
                source,
            })?;

        if !cfg.admits_resource_group(&resource.resource_group) {
            tracing::debug!(
                node = %name,
                resource_group = %resource.resource_group,
                "resource group excluded by filter"
            );
            if let Some(ticket) = ticket {
                ticket.complete();
            }
            let mut result = NodeSyncResult::new(
                name,
                PassStatus::Filtered {
                    resource_group: resource.resource_group.clone(),
                },
            );
            result.resource = Some(resource);
            return Ok(result);
        }

        let mut compute = ctx
            .bound("fetch compute resource", self.compute.fetch(&resource))
            .await
            .map_err(collab_err(name, "fetch compute resource"))?;

        let label_plan = cfg
            .sync_direction
            .syncs_tags_to_labels()
            .then(|| plan_labels_from_tags(compute.tags(), &node.labels, cfg));
        let tag_plan = cfg
            .sync_direction
            .syncs_labels_to_tags()
            .then(|| plan_tags_from_labels(&node.labels, compute.tags(), cfg));

        let mut result = NodeSyncResult::new(name, PassStatus::Synced);
        result.resource = Some(resource.clone());
        result.label_plan = label_plan;
        result.tag_plan = tag_plan;

        for skipped in result
            .label_plan
            .iter()
            .flat_map(|p| p.skipped.iter())
            .chain(result.tag_plan.iter().flat_map(|p| p.skipped.iter()))
        {
            tracing::debug!(node = %name, key = %skipped.key, reason = ?skipped.reason, "key not synced");
        }

        for conflict in result.conflicts() {
            tracing::warn!(
                node = %name,
                resource = %resource,
                direction = %conflict.direction,
                key = %conflict.key,
                "{}",
                conflict.message()
            );
            if mode == PassMode::Apply {
                self.publish(&node, conflict, ctx).await;
            }
        }

        if let Some(plan) = result.label_plan.as_ref().filter(|p| p.changed) {
            let count = plan.delta.len();
            match mode {
                PassMode::DryRun => {
                    tracing::info!(node = %name, count, "[dry-run] would patch labels");
                    result.writes.push(WriteResult::WouldPatchLabels { count });
                }
                PassMode::Apply => {
                    ctx.bound(
                        "patch node labels",
                        self.nodes.patch_labels(name, &plan.merge_patch()),
                    )
                    .await
                    .map_err(collab_err(name, "patch node labels"))?;
                    tracing::info!(node = %name, count, "patched node labels");
                    result.writes.push(WriteResult::LabelsPatched { count });
                }
            }
        }

        if let Some(plan) = result.tag_plan.as_ref().filter(|p| p.changed) {
            let count = plan.delta.len();
            match mode {
                PassMode::DryRun => {
                    tracing::info!(node = %name, resource = %resource, count, "[dry-run] would update tags");
                    result.writes.push(WriteResult::WouldUpdateTags { count });
                }
                PassMode::Apply => {
                    compute.replace_tags(plan.tags.clone());
                    ctx.bound("commit resource tags", compute.commit())
                        .await
                        .map_err(collab_err(name, "commit resource tags"))?;
                    tracing::info!(node = %name, resource = %resource, count, "updated resource tags");
                    result.writes.push(WriteResult::TagsUpdated { count });
                }
            }
        }

        if let Some(ticket) = ticket {
            ticket.complete();
        }
        Ok(result)
    }

    /// Record a conflict event; failures are logged and otherwise ignored.
    async fn publish(&self, node: &NodeSnapshot, conflict: &Conflict, ctx: &PassContext) {
        if let Err(err) = ctx
            .bound("record conflict event", self.events.conflict(node, conflict))
            .await
        {
            tracing::warn!(node = %node.name, error = %err, "failed to record conflict event");
        }
    }
}
