//! Conflict resolution between a tag value and a label value for the same key.
//!
//! | policy          | tag → label              | label → tag              |
//! |-----------------|--------------------------|--------------------------|
//! | arm-precedence  | overwrite label          | keep tag, notify         |
//! | node-precedence | keep label, notify       | overwrite tag            |
//! | ignore          | keep label, notify       | keep tag, notify         |
//!
//! Equal values are never a conflict.

use std::fmt;

use serde::Serialize;

use labelsync_core::ConflictPolicy;

/// Which branch of a pass is writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    TagToLabel,
    LabelToTag,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::TagToLabel => f.write_str("tag-to-label"),
            Direction::LabelToTag => f.write_str("label-to-tag"),
        }
    }
}

/// Outcome of comparing an existing value with an incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Values already agree.
    Unchanged,
    /// Replace the existing value with the incoming one.
    Overwrite,
    /// Leave the existing value and report the disagreement.
    KeepAndNotify,
}

pub fn resolve(
    existing: &str,
    incoming: &str,
    policy: ConflictPolicy,
    direction: Direction,
) -> Resolution {
    if existing == incoming {
        return Resolution::Unchanged;
    }
    match (policy, direction) {
        (ConflictPolicy::ArmPrecedence, Direction::TagToLabel)
        | (ConflictPolicy::NodePrecedence, Direction::LabelToTag) => Resolution::Overwrite,
        (ConflictPolicy::ArmPrecedence, Direction::LabelToTag)
        | (ConflictPolicy::NodePrecedence, Direction::TagToLabel)
        | (ConflictPolicy::Ignore, _) => Resolution::KeepAndNotify,
    }
}

/// A disagreement left unresolved by the policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub direction: Direction,
    /// Key on the side that would have been written.
    pub key: String,
    /// Key on the side the value came from.
    pub source_key: String,
    /// Value currently on the target side.
    pub existing: String,
    /// Value the source side wanted to write.
    pub incoming: String,
}

impl Conflict {
    /// Human-readable note used for events and logs.
    pub fn message(&self) -> String {
        match self.direction {
            Direction::TagToLabel => format!(
                "ARM tag was not applied to node because a different value for '{}' already exists ({} != {}).",
                self.source_key, self.incoming, self.existing
            ),
            Direction::LabelToTag => format!(
                "node label was not applied to Azure resource because a different value for '{}' already exists ({} != {}).",
                self.source_key, self.incoming, self.existing
            ),
        }
    }
}
