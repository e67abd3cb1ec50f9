//! # labelsync-sync
//!
//! Conflict resolution, sync planning, pass scheduling and orchestration.
//!
//! Call [`Reconciler::reconcile_node`] to run one pass for a single node, or
//! [`pipeline::run`] to process a [`SyncScope`] concurrently. The planners in
//! [`planner`] are pure and can be driven without any collaborator.

pub mod client;
pub mod conflict;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod reconcile;
pub mod scheduler;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ComputeProvider, ComputeResource, EventRecorder, NodeClient, NodeSnapshot, PassContext};
pub use conflict::{resolve, Conflict, Direction, Resolution};
pub use error::{ClientError, SyncError};
pub use pipeline::{NodeOutcome, RunOptions, SyncScope};
pub use planner::{plan_labels_from_tags, plan_tags_from_labels, LabelPlan, TagPlan};
pub use reconcile::{NodeSyncResult, PassMode, PassStatus, Reconciler, WriteResult};
pub use scheduler::{Admission, Clock, PassTicket, SyncState, SyncTracker, SystemClock};
