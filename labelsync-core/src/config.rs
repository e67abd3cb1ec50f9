//! Configuration loading and validation.
//!
//! # Sources
//!
//! Options arrive as a flat string mapping, either from a YAML file or from
//! the `data` of a Kubernetes ConfigMap:
//!
//! ```yaml
//! syncDirection: two-way          # arm-to-node | node-to-arm | two-way
//! labelPrefix: azure.tags
//! tagPrefix: node.labels
//! conflictPolicy: arm-precedence  # arm-precedence | node-precedence | ignore
//! resourceGroupFilter: none       # "none" or empty disables the filter
//! minSyncPeriod: 5m
//! ```
//!
//! Every key is optional and an empty value counts as omitted; defaults fill
//! omissions. An unrecognised enum value or duration fails the load.
//!
//! # API pattern
//!
//! Same shape as the other file-backed stores in this workspace:
//! `load_at(path)` / `save_at(path, …)` take an explicit path so tests can
//! point them at a `TempDir`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::naming::{label_prefix_is_valid, MAX_LABEL_PREFIX_LEN};
use crate::types::{
    ConfigOptions, ConflictPolicy, SyncDirection, DEFAULT_LABEL_PREFIX, DEFAULT_MIN_SYNC_PERIOD,
    DEFAULT_TAG_PREFIX,
};

/// Name of the ConfigMap holding options in-cluster.
pub const CONFIG_MAP_NAME: &str = "node-label-operator";
/// Namespace of the ConfigMap holding options in-cluster.
pub const CONFIG_MAP_NAMESPACE: &str = "node-label-operator-system";
/// Sentinel for "no resource group filter".
pub const NO_RESOURCE_GROUP_FILTER: &str = "none";

/// Unvalidated options exactly as they appear in a source mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawConfigOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_sync_period: Option<String>,
}

impl RawConfigOptions {
    /// Apply defaults and validate every field.
    pub fn validate(self) -> Result<ConfigOptions, ConfigError> {
        let sync_direction = match given(self.sync_direction) {
            Some(s) => s.parse::<SyncDirection>()?,
            None => SyncDirection::default(),
        };

        let conflict_policy = match given(self.conflict_policy) {
            Some(s) => s.parse::<ConflictPolicy>()?,
            None => ConflictPolicy::default(),
        };

        let label_prefix =
            given(self.label_prefix).unwrap_or_else(|| DEFAULT_LABEL_PREFIX.to_owned());
        if label_prefix.len() > MAX_LABEL_PREFIX_LEN {
            return Err(ConfigError::LabelPrefixTooLong {
                len: label_prefix.len(),
                max: MAX_LABEL_PREFIX_LEN,
            });
        }
        if !label_prefix_is_valid(&label_prefix) {
            return Err(ConfigError::InvalidLabelPrefix(label_prefix));
        }

        let tag_prefix = given(self.tag_prefix).unwrap_or_else(|| DEFAULT_TAG_PREFIX.to_owned());

        let resource_group_filter = given(self.resource_group_filter)
            .filter(|f| !f.eq_ignore_ascii_case(NO_RESOURCE_GROUP_FILTER));

        let min_sync_period = match given(self.min_sync_period) {
            Some(value) => humantime::parse_duration(&value)
                .map_err(|source| ConfigError::InvalidDuration { value, source })?,
            None => DEFAULT_MIN_SYNC_PERIOD,
        };

        Ok(ConfigOptions {
            sync_direction,
            label_prefix,
            tag_prefix,
            conflict_policy,
            resource_group_filter,
            min_sync_period,
        })
    }
}

impl From<&ConfigOptions> for RawConfigOptions {
    fn from(cfg: &ConfigOptions) -> Self {
        Self {
            sync_direction: Some(cfg.sync_direction.to_string()),
            label_prefix: Some(cfg.label_prefix.clone()),
            tag_prefix: Some(cfg.tag_prefix.clone()),
            conflict_policy: Some(cfg.conflict_policy.to_string()),
            resource_group_filter: Some(
                cfg.resource_group_filter
                    .clone()
                    .unwrap_or_else(|| NO_RESOURCE_GROUP_FILTER.to_owned()),
            ),
            min_sync_period: Some(humantime::format_duration(cfg.min_sync_period).to_string()),
        }
    }
}

fn given(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Mapping (ConfigMap data)
// ---------------------------------------------------------------------------

/// Validate options from a string mapping. Unknown keys are ignored.
pub fn from_map(map: &BTreeMap<String, String>) -> Result<ConfigOptions, ConfigError> {
    let value = serde_json::to_value(map)?;
    let raw: RawConfigOptions = serde_json::from_value(value)?;
    raw.validate()
}

/// Render options as a string mapping with every key present.
pub fn to_map(cfg: &ConfigOptions) -> BTreeMap<String, String> {
    let raw = RawConfigOptions::from(cfg);
    [
        ("syncDirection", raw.sync_direction),
        ("labelPrefix", raw.label_prefix),
        ("tagPrefix", raw.tag_prefix),
        ("conflictPolicy", raw.conflict_policy),
        ("resourceGroupFilter", raw.resource_group_filter),
        ("minSyncPeriod", raw.min_sync_period),
    ]
    .into_iter()
    .filter_map(|(k, v)| v.map(|v| (k.to_owned(), v)))
    .collect()
}

// ---------------------------------------------------------------------------
// File
// ---------------------------------------------------------------------------

/// Load and validate options from a YAML file.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path
/// and line context) if the YAML is malformed. An empty file yields defaults.
pub fn load_at(path: &Path) -> Result<ConfigOptions, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return RawConfigOptions::default().validate();
    }
    let raw: RawConfigOptions = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    raw.validate()
}

/// Write options to `path` atomically (`<path>.tmp` then rename).
pub fn save_at(path: &Path, cfg: &ConfigOptions) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let yaml = serde_yaml::to_string(&RawConfigOptions::from(cfg))?;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
