//! Shared pass entrypoint used by the CLI and the daemon processor.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use labelsync_core::ConfigOptions;

use crate::client::PassContext;
use crate::error::SyncError;
use crate::reconcile::{NodeSyncResult, PassMode, Reconciler};

/// Scope for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every node in the cluster.
    All,
    /// A single named node.
    Node(String),
}

/// Per-run knobs.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: PassMode,
    /// Deadline for each node's pass, counted from its start.
    pub pass_timeout: Duration,
    /// Maximum number of node passes in flight.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: PassMode::Apply,
            pass_timeout: Duration::from_secs(60),
            concurrency: 4,
        }
    }
}

/// Result of one node's pass within a run.
#[derive(Debug)]
pub struct NodeOutcome {
    pub node_name: String,
    pub result: Result<NodeSyncResult, SyncError>,
}

/// Run passes for every node in `scope`.
///
/// Listing failures fail the whole run; a failed pass only fails its own
/// [`NodeOutcome`]. Outcomes are returned sorted by node name.
pub async fn run(
    reconciler: &Reconciler,
    cfg: &ConfigOptions,
    scope: SyncScope,
    opts: &RunOptions,
    cancel: &CancellationToken,
) -> Result<Vec<NodeOutcome>, SyncError> {
    let names = match scope {
        SyncScope::Node(name) => vec![name],
        SyncScope::All => {
            let ctx = PassContext::new(opts.pass_timeout, cancel.child_token());
            ctx.bound("list nodes", reconciler.nodes().list_nodes())
                .await
                .map_err(SyncError::ListNodes)?
        }
    };

    let mut outcomes: Vec<NodeOutcome> = stream::iter(names)
        .map(|node_name| {
            let ctx = PassContext::new(opts.pass_timeout, cancel.child_token());
            async move {
                let result = reconciler
                    .reconcile_node(&node_name, cfg, &ctx, opts.mode)
                    .await;
                if let Err(err) = &result {
                    tracing::error!(node = %node_name, error = %err, "pass failed");
                }
                NodeOutcome { node_name, result }
            }
        })
        .buffer_unordered(opts.concurrency.max(1))
        .collect()
        .await;

    outcomes.sort_by(|a, b| a.node_name.cmp(&b.node_name));
    Ok(outcomes)
}
