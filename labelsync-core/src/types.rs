//! Domain types for labelsync.
//!
//! Tag and label sets are `BTreeMap`s so every walk over them is ordered and
//! capacity decisions are reproducible between passes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tag set of a compute resource: tag name → tag value.
pub type TagMap = BTreeMap<String, String>;

/// Label set of a Kubernetes node: label key → label value.
pub type LabelMap = BTreeMap<String, String>;

pub const DEFAULT_LABEL_PREFIX: &str = "azure.tags";
pub const DEFAULT_TAG_PREFIX: &str = "node.labels";
pub const DEFAULT_MIN_SYNC_PERIOD: Duration = Duration::from_secs(5 * 60);

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which side is the source for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SyncDirection {
    /// Tags → labels only.
    #[default]
    ArmToNode,
    /// Labels → tags only.
    NodeToArm,
    /// Both branches, planned from the same snapshot.
    TwoWay,
}

impl SyncDirection {
    pub fn syncs_tags_to_labels(self) -> bool {
        matches!(self, SyncDirection::ArmToNode | SyncDirection::TwoWay)
    }

    pub fn syncs_labels_to_tags(self) -> bool {
        matches!(self, SyncDirection::NodeToArm | SyncDirection::TwoWay)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SyncDirection::ArmToNode => "arm-to-node",
            SyncDirection::NodeToArm => "node-to-arm",
            SyncDirection::TwoWay => "two-way",
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncDirection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm-to-node" => Ok(SyncDirection::ArmToNode),
            "node-to-arm" => Ok(SyncDirection::NodeToArm),
            "two-way" => Ok(SyncDirection::TwoWay),
            other => Err(ConfigError::InvalidSyncDirection(other.to_owned())),
        }
    }
}

/// Tie-break rule when the same logical key holds different values on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The cloud tag wins.
    #[default]
    ArmPrecedence,
    /// The node label wins.
    NodePrecedence,
    /// Neither side is overwritten; conflicts are only reported.
    Ignore,
}

impl ConflictPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            ConflictPolicy::ArmPrecedence => "arm-precedence",
            ConflictPolicy::NodePrecedence => "node-precedence",
            ConflictPolicy::Ignore => "ignore",
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "arm-precedence" => Ok(ConflictPolicy::ArmPrecedence),
            "node-precedence" => Ok(ConflictPolicy::NodePrecedence),
            "ignore" => Ok(ConflictPolicy::Ignore),
            other => Err(ConfigError::InvalidConflictPolicy(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Validated options for one reconciliation pass.
///
/// Built through [`crate::config`]; a value of this type has already passed
/// validation, so consumers never re-check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOptions {
    pub sync_direction: SyncDirection,
    pub label_prefix: String,
    pub tag_prefix: String,
    pub conflict_policy: ConflictPolicy,
    /// Only nodes in this resource group are synced; `None` syncs all.
    pub resource_group_filter: Option<String>,
    pub min_sync_period: Duration,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            sync_direction: SyncDirection::default(),
            label_prefix: DEFAULT_LABEL_PREFIX.to_owned(),
            tag_prefix: DEFAULT_TAG_PREFIX.to_owned(),
            conflict_policy: ConflictPolicy::default(),
            resource_group_filter: None,
            min_sync_period: DEFAULT_MIN_SYNC_PERIOD,
        }
    }
}

impl ConfigOptions {
    /// Whether a node in `resource_group` passes the configured filter.
    ///
    /// Azure resource group names are case-insensitive, so unlike an exact
    /// string comparison the filter matches regardless of case.
    pub fn admits_resource_group(&self, resource_group: &str) -> bool {
        match &self.resource_group_filter {
            None => true,
            Some(filter) => filter.eq_ignore_ascii_case(resource_group),
        }
    }
}

// ---------------------------------------------------------------------------
// Resource identity
// ---------------------------------------------------------------------------

/// Kind of compute resource backing a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    VirtualMachine,
    VirtualMachineScaleSet,
}

impl ResourceKind {
    /// ARM resource type segment under `Microsoft.Compute`.
    pub fn arm_type(self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "virtualMachines",
            ResourceKind::VirtualMachineScaleSet => "virtualMachineScaleSets",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.arm_type())
    }
}

/// Identity of the compute resource backing a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub kind: ResourceKind,
    pub name: String,
}

impl ResourceId {
    /// ARM resource path, e.g.
    /// `/subscriptions/<sub>/resourceGroups/<rg>/providers/Microsoft.Compute/virtualMachines/<name>`.
    pub fn arm_path(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/{}/{}",
            self.subscription_id,
            self.resource_group,
            self.kind.arm_type(),
            self.name
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource_group, self.kind, self.name)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
