//! Pure sync planning.
//!
//! Each planner walks the source side against the target side and returns a
//! plan: the full updated target map, the minimal delta to write, any
//! conflicts left unresolved, and the source keys that could not be carried
//! over. Inputs are never mutated; nothing is written until the caller
//! commits the plan.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::json;

use labelsync_core::{
    naming::{
        label_key_is_valid, label_name_to_tag_name, label_value_is_valid,
        label_value_to_tag_value, tag_name_is_valid, tag_name_to_label_name,
        tag_value_to_label_value, MAX_TAG_COUNT,
    },
    ConfigOptions, LabelMap, TagMap,
};

use crate::conflict::{resolve, Conflict, Direction, Resolution};

/// Why a source key was left out of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    InvalidTagName,
    InvalidLabelKey,
    InvalidLabelValue,
    TagLimitReached,
    /// The label key is the truncated form of a longer existing tag name.
    TruncatedTagName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub key: String,
    pub reason: SkipReason,
}

/// Tag → label plan for one node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct LabelPlan {
    pub changed: bool,
    /// Existing labels with the planned changes applied.
    pub labels: LabelMap,
    /// Only the keys to write.
    pub delta: LabelMap,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<Skipped>,
}

impl LabelPlan {
    /// Merge patch touching only `metadata.labels`; never removes a label.
    pub fn merge_patch(&self) -> serde_json::Value {
        json!({ "metadata": { "labels": self.delta } })
    }
}

/// Label → tag plan for one compute resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TagPlan {
    pub changed: bool,
    /// Full tag set to send on commit.
    pub tags: TagMap,
    pub delta: TagMap,
    pub conflicts: Vec<Conflict>,
    pub skipped: Vec<Skipped>,
}

/// Plan the label writes that bring `existing_labels` in line with `tags`.
pub fn plan_labels_from_tags(
    tags: &TagMap,
    existing_labels: &LabelMap,
    cfg: &ConfigOptions,
) -> LabelPlan {
    let mut plan = LabelPlan {
        labels: existing_labels.clone(),
        ..LabelPlan::default()
    };

    for (tag_name, tag_value) in tags {
        if !tag_name_is_valid(tag_name) {
            plan.skip(tag_name, SkipReason::InvalidTagName);
            continue;
        }
        let label_key = tag_name_to_label_name(tag_name, cfg);
        if !label_key_is_valid(&label_key) {
            plan.skip(tag_name, SkipReason::InvalidLabelKey);
            continue;
        }
        let label_value = tag_value_to_label_value(tag_value);
        if !label_value_is_valid(&label_value) {
            plan.skip(tag_name, SkipReason::InvalidLabelValue);
            continue;
        }

        let write = match existing_labels.get(&label_key) {
            None => true,
            Some(existing) => match resolve(
                existing,
                &label_value,
                cfg.conflict_policy,
                Direction::TagToLabel,
            ) {
                Resolution::Unchanged => false,
                Resolution::Overwrite => true,
                Resolution::KeepAndNotify => {
                    plan.conflicts.push(Conflict {
                        direction: Direction::TagToLabel,
                        key: label_key.clone(),
                        source_key: tag_name.clone(),
                        existing: existing.clone(),
                        incoming: label_value.clone(),
                    });
                    false
                }
            },
        };

        if write {
            plan.labels.insert(label_key.clone(), label_value.clone());
            plan.delta.insert(label_key, label_value);
            plan.changed = true;
        }
    }

    plan
}

/// Plan the tag set that brings `existing_tags` in line with `labels`.
///
/// New tags are only added while the resource holds fewer than
/// [`MAX_TAG_COUNT`] tags; overwriting an existing tag is always allowed.
///
/// Labels that were themselves derived from an existing tag are left alone:
/// a truncated label value never replaces the full tag value, and a
/// truncated label key never becomes a second tag.
pub fn plan_tags_from_labels(
    labels: &LabelMap,
    existing_tags: &TagMap,
    cfg: &ConfigOptions,
) -> TagPlan {
    let mut plan = TagPlan {
        tags: existing_tags.clone(),
        ..TagPlan::default()
    };
    let mut room = MAX_TAG_COUNT.saturating_sub(existing_tags.len());
    let derived_keys: BTreeSet<String> = existing_tags
        .keys()
        .map(|name| tag_name_to_label_name(name, cfg))
        .collect();

    for (label_key, label_value) in labels {
        let tag_name = label_name_to_tag_name(label_key, cfg);
        if !tag_name_is_valid(&tag_name) {
            plan.skip(label_key, SkipReason::InvalidTagName);
            continue;
        }
        let tag_value = label_value_to_tag_value(label_value);

        let write = match existing_tags.get(&tag_name) {
            None if derived_keys.contains(label_key) => {
                plan.skip(label_key, SkipReason::TruncatedTagName);
                false
            }
            None if room == 0 => {
                plan.skip(label_key, SkipReason::TagLimitReached);
                false
            }
            None => {
                room -= 1;
                true
            }
            Some(existing) if tag_value_to_label_value(existing) == *label_value => false,
            Some(existing) => match resolve(
                existing,
                &tag_value,
                cfg.conflict_policy,
                Direction::LabelToTag,
            ) {
                Resolution::Unchanged => false,
                Resolution::Overwrite => true,
                Resolution::KeepAndNotify => {
                    plan.conflicts.push(Conflict {
                        direction: Direction::LabelToTag,
                        key: tag_name.clone(),
                        source_key: label_key.clone(),
                        existing: existing.clone(),
                        incoming: tag_value.clone(),
                    });
                    false
                }
            },
        };

        if write {
            plan.tags.insert(tag_name.clone(), tag_value.clone());
            plan.delta.insert(tag_name, tag_value);
            plan.changed = true;
        }
    }

    plan
}

impl LabelPlan {
    fn skip(&mut self, key: &str, reason: SkipReason) {
        self.skipped.push(Skipped {
            key: key.to_owned(),
            reason,
        });
    }
}

impl TagPlan {
    fn skip(&mut self, key: &str, reason: SkipReason) {
        self.skipped.push(Skipped {
            key: key.to_owned(),
            reason,
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use labelsync_core::{naming::label_name_is_valid, ConflictPolicy, SyncDirection};
    use rstest::rstest;

    fn map(pairs: &[(&str, &str)]) -> std::collections::BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cfg(policy: ConflictPolicy) -> ConfigOptions {
        ConfigOptions {
            conflict_policy: policy,
            ..ConfigOptions::default()
        }
    }

    #[test]
    fn tags_onto_empty_node() {
        let plan = plan_labels_from_tags(
            &map(&[("env", "test"), ("dept", "hr")]),
            &LabelMap::new(),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert!(plan.changed);
        assert_eq!(
            plan.delta,
            map(&[("azure.tags/env", "test"), ("azure.tags/dept", "hr")])
        );
        assert_eq!(
            plan.merge_patch(),
            json!({"metadata": {"labels": {"azure.tags/env": "test", "azure.tags/dept": "hr"}}})
        );
    }

    #[test]
    fn unrelated_labels_are_preserved_but_not_patched() {
        let plan = plan_labels_from_tags(
            &map(&[("env", "test")]),
            &map(&[("favfruit", "banana")]),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert_eq!(plan.labels.get("favfruit").map(String::as_str), Some("banana"));
        assert_eq!(plan.delta, map(&[("azure.tags/env", "test")]));
    }

    #[test]
    fn second_plan_is_a_noop() {
        let long = "v".repeat(100);
        let tags = map(&[("env", "test"), ("long", long.as_str())]);
        let first = plan_labels_from_tags(&tags, &LabelMap::new(), &cfg(ConflictPolicy::ArmPrecedence));
        assert!(first.changed);
        let second = plan_labels_from_tags(&tags, &first.labels, &cfg(ConflictPolicy::ArmPrecedence));
        assert!(!second.changed);
        assert!(second.delta.is_empty());
    }

    #[test]
    fn arm_precedence_overwrites_label() {
        let plan = plan_labels_from_tags(
            &map(&[("env", "test")]),
            &map(&[("azure.tags/env", "prod")]),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert_eq!(plan.delta, map(&[("azure.tags/env", "test")]));
        assert!(plan.conflicts.is_empty());
    }

    #[test]
    fn node_precedence_keeps_label_and_reports() {
        let plan = plan_labels_from_tags(
            &map(&[("env", "test")]),
            &map(&[("azure.tags/env", "prod")]),
            &cfg(ConflictPolicy::NodePrecedence),
        );
        assert!(!plan.changed);
        assert_eq!(plan.conflicts.len(), 1);
        let conflict = &plan.conflicts[0];
        assert_eq!(conflict.key, "azure.tags/env");
        assert_eq!(conflict.source_key, "env");
        assert_eq!(conflict.existing, "prod");
        assert_eq!(conflict.incoming, "test");
    }

    #[test]
    fn ignore_reports_in_both_directions() {
        let cfg = cfg(ConflictPolicy::Ignore);
        let labels = plan_labels_from_tags(
            &map(&[("env", "test")]),
            &map(&[("azure.tags/env", "prod")]),
            &cfg,
        );
        let tags = plan_tags_from_labels(
            &map(&[("azure.tags/env", "prod")]),
            &map(&[("env", "test")]),
            &cfg,
        );
        assert!(!labels.changed && !tags.changed);
        assert_eq!(labels.conflicts.len(), 1);
        assert_eq!(tags.conflicts.len(), 1);
    }

    #[test]
    fn invalid_tags_are_skipped_silently() {
        let plan = plan_labels_from_tags(
            &map(&[
                ("a/b", "x"),
                ("has space", "x"),
                ("ok", "has space"),
                ("good", "fine"),
            ]),
            &LabelMap::new(),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert_eq!(plan.delta, map(&[("azure.tags/good", "fine")]));
        let reasons: Vec<_> = plan.skipped.iter().map(|s| (s.key.as_str(), s.reason)).collect();
        assert!(reasons.contains(&("a/b", SkipReason::InvalidTagName)));
        assert!(reasons.contains(&("has space", SkipReason::InvalidLabelKey)));
        assert!(reasons.contains(&("ok", SkipReason::InvalidLabelValue)));
    }

    #[test]
    fn accepted_tags_always_produce_valid_labels() {
        let long = "n".repeat(120);
        let tags = map(&[
            ("env", "a"),
            ("x.y_z-1", "b"),
            (long.as_str(), "c"),
            ("trailing-", "d"),
            ("Ünïcode", "e"),
        ]);
        let cfg = cfg(ConflictPolicy::ArmPrecedence);
        let plan = plan_labels_from_tags(&tags, &LabelMap::new(), &cfg);
        for key in plan.delta.keys() {
            assert!(label_key_is_valid(key), "{key}");
            let segment = key.rsplit('/').next().unwrap_or_default();
            assert!(label_name_is_valid(segment));
            assert!(key.len() <= cfg.label_prefix.len() + 1 + 63);
        }
    }

    #[test]
    fn labels_onto_empty_resource() {
        let cfg = ConfigOptions {
            sync_direction: SyncDirection::NodeToArm,
            ..cfg(ConflictPolicy::NodePrecedence)
        };
        let plan = plan_tags_from_labels(
            &map(&[("favfruit", "banana"), ("favveg", "broccoli")]),
            &TagMap::new(),
            &cfg,
        );
        assert!(plan.changed);
        assert_eq!(plan.tags, map(&[("favfruit", "banana"), ("favveg", "broccoli")]));
    }

    #[test]
    fn prefixed_labels_become_bare_tags_and_system_labels_are_skipped() {
        let plan = plan_tags_from_labels(
            &map(&[
                ("azure.tags/env", "test"),
                ("kubernetes.io/hostname", "node-0"),
            ]),
            &TagMap::new(),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert_eq!(plan.delta, map(&[("env", "test")]));
        assert_eq!(plan.skipped[0].key, "kubernetes.io/hostname");
    }

    #[test]
    fn node_precedence_overwrites_tag_and_keeps_full_map() {
        let plan = plan_tags_from_labels(
            &map(&[("azure.tags/env", "prod")]),
            &map(&[("env", "test"), ("owner", "ops")]),
            &cfg(ConflictPolicy::NodePrecedence),
        );
        assert!(plan.changed);
        assert_eq!(plan.tags, map(&[("env", "prod"), ("owner", "ops")]));
        assert_eq!(plan.delta, map(&[("env", "prod")]));
    }

    #[test]
    fn full_resource_gets_no_new_tags() {
        let existing: TagMap = (0..MAX_TAG_COUNT)
            .map(|i| (format!("tag{i:02}"), "v".to_string()))
            .collect();
        let plan = plan_tags_from_labels(
            &map(&[("brand-new", "x")]),
            &existing,
            &cfg(ConflictPolicy::NodePrecedence),
        );
        assert!(!plan.changed);
        assert_eq!(plan.tags, existing);
        assert_eq!(plan.skipped[0].reason, SkipReason::TagLimitReached);
    }

    #[test]
    fn full_resource_still_accepts_overwrites() {
        let existing: TagMap = (0..MAX_TAG_COUNT)
            .map(|i| (format!("tag{i:02}"), "v".to_string()))
            .collect();
        let plan = plan_tags_from_labels(
            &map(&[("tag07", "w")]),
            &existing,
            &cfg(ConflictPolicy::NodePrecedence),
        );
        assert!(plan.changed);
        assert_eq!(plan.tags.len(), MAX_TAG_COUNT);
    }

    #[test]
    fn additions_stop_at_the_limit() {
        let existing: TagMap = (0..MAX_TAG_COUNT - 1)
            .map(|i| (format!("tag{i:02}"), "v".to_string()))
            .collect();
        let plan = plan_tags_from_labels(
            &map(&[("a", "1"), ("b", "2")]),
            &existing,
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert_eq!(plan.tags.len(), MAX_TAG_COUNT);
        assert_eq!(plan.delta, map(&[("a", "1")]));
        assert_eq!(plan.skipped.len(), 1);
    }

    #[rstest]
    #[case(ConflictPolicy::ArmPrecedence)]
    #[case(ConflictPolicy::NodePrecedence)]
    #[case(ConflictPolicy::Ignore)]
    fn two_way_cycle_keeps_long_tag_values(#[case] policy: ConflictPolicy) {
        let cfg = ConfigOptions {
            sync_direction: SyncDirection::TwoWay,
            ..cfg(policy)
        };
        let long = "v".repeat(100);
        let tags = map(&[("desc", long.as_str())]);

        let labels = plan_labels_from_tags(&tags, &LabelMap::new(), &cfg);
        assert_eq!(labels.delta["azure.tags/desc"].len(), 63);

        let back = plan_tags_from_labels(&labels.labels, &tags, &cfg);
        assert!(!back.changed);
        assert!(back.conflicts.is_empty());
        assert_eq!(back.tags["desc"], long);
    }

    #[test]
    fn shorter_label_value_that_is_not_a_truncation_still_conflicts() {
        let long = "v".repeat(100);
        let plan = plan_tags_from_labels(
            &map(&[("azure.tags/desc", "short")]),
            &map(&[("desc", long.as_str())]),
            &cfg(ConflictPolicy::ArmPrecedence),
        );
        assert!(!plan.changed);
        assert_eq!(plan.conflicts.len(), 1);
    }

    #[test]
    fn two_way_cycle_adds_no_tag_for_truncated_name() {
        let cfg = ConfigOptions {
            sync_direction: SyncDirection::TwoWay,
            ..cfg(ConflictPolicy::NodePrecedence)
        };
        let long = "n".repeat(80);
        let tags = map(&[(long.as_str(), "x")]);

        let labels = plan_labels_from_tags(&tags, &LabelMap::new(), &cfg);
        let truncated_key = format!("azure.tags/{}", "n".repeat(63));
        assert!(labels.delta.contains_key(&truncated_key));

        let back = plan_tags_from_labels(&labels.labels, &tags, &cfg);
        assert!(!back.changed);
        assert_eq!(back.tags, tags);
        assert_eq!(back.skipped.len(), 1);
        assert_eq!(back.skipped[0].key, truncated_key);
        assert_eq!(back.skipped[0].reason, SkipReason::TruncatedTagName);
    }

    #[test]
    fn planners_do_not_mutate_inputs() {
        let tags = map(&[("env", "test")]);
        let labels = map(&[("azure.tags/env", "prod"), ("favfruit", "banana")]);
        let cfg = cfg(ConflictPolicy::ArmPrecedence);
        let _ = plan_labels_from_tags(&tags, &labels, &cfg);
        let _ = plan_tags_from_labels(&labels, &tags, &cfg);
        assert_eq!(tags, map(&[("env", "test")]));
        assert_eq!(labels.len(), 2);
    }
}
