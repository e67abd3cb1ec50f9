//! Config file error-message, atomic-write-safety, and defaulting tests.

use assert_fs::prelude::*;
use labelsync_core::{
    config::{self, RawConfigOptions},
    ConfigError, ConfigOptions, ConflictPolicy, SyncDirection,
};
use predicates::prelude::predicate;
use std::fs;
use std::time::Duration;

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_returns_not_found() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("labelsync.yaml");
    let err = config::load_at(&path).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config not found"));
    assert!(err.to_string().contains("labelsync.yaml"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("labelsync.yaml");
    file.write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("labelsync.yaml"));
}

#[test]
fn load_invalid_direction_names_the_value() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("labelsync.yaml");
    file.write_str("syncDirection: backwards\n").expect("write");

    let err = config::load_at(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSyncDirection(_)));
    assert!(err.to_string().contains("backwards"));
}

// ---------------------------------------------------------------------------
// 2. Defaults
// ---------------------------------------------------------------------------

#[test]
fn empty_file_yields_defaults() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("labelsync.yaml");
    file.write_str("").expect("write");

    let cfg = config::load_at(file.path()).expect("load");
    assert_eq!(cfg, ConfigOptions::default());
}

#[test]
fn partial_file_fills_omissions() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let file = dir.child("labelsync.yaml");
    file.write_str("syncDirection: two-way\nminSyncPeriod: 1m\n")
        .expect("write");

    let cfg = config::load_at(file.path()).expect("load");
    assert_eq!(cfg.sync_direction, SyncDirection::TwoWay);
    assert_eq!(cfg.min_sync_period, Duration::from_secs(60));
    assert_eq!(cfg.conflict_policy, ConflictPolicy::ArmPrecedence);
    assert_eq!(cfg.label_prefix, "azure.tags");
}

// ---------------------------------------------------------------------------
// 3. Save
// ---------------------------------------------------------------------------

#[test]
fn save_then_load_preserves_options() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("nested").join("labelsync.yaml");
    let cfg = ConfigOptions {
        sync_direction: SyncDirection::NodeToArm,
        conflict_policy: ConflictPolicy::Ignore,
        resource_group_filter: Some("mc_rg".into()),
        ..ConfigOptions::default()
    };

    config::save_at(&path, &cfg).expect("save");
    assert_eq!(config::load_at(&path).expect("load"), cfg);
}

#[test]
fn save_leaves_no_tmp_file() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("labelsync.yaml");
    config::save_at(&path, &ConfigOptions::default()).expect("save");

    dir.child("labelsync.yaml.tmp")
        .assert(predicate::path::missing());
    dir.child("labelsync.yaml")
        .assert(predicate::str::contains("syncDirection: arm-to-node"));
}

#[test]
fn saved_file_uses_camel_case_keys() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let path = dir.path().join("labelsync.yaml");
    config::save_at(&path, &ConfigOptions::default()).expect("save");

    let raw: RawConfigOptions =
        serde_yaml::from_str(&fs::read_to_string(&path).expect("read")).expect("yaml");
    assert_eq!(raw.min_sync_period.as_deref(), Some("5m"));
    assert_eq!(raw.resource_group_filter.as_deref(), Some("none"));
    assert_eq!(raw.tag_prefix.as_deref(), Some("node.labels"));
}
