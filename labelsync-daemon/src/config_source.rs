//! Where a pass gets its options from.
//!
//! Options are reloaded and revalidated before every pass. With a ConfigMap
//! source, a missing ConfigMap is created with default values.

use std::path::PathBuf;
use std::str::FromStr;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;

use labelsync_core::{
    config::{self, CONFIG_MAP_NAME, CONFIG_MAP_NAMESPACE},
    ConfigOptions,
};

use crate::error::DaemonError;

/// Options location as given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigLocation {
    File(PathBuf),
    ConfigMap { namespace: String, name: String },
}

impl Default for ConfigLocation {
    fn default() -> Self {
        ConfigLocation::ConfigMap {
            namespace: CONFIG_MAP_NAMESPACE.to_owned(),
            name: CONFIG_MAP_NAME.to_owned(),
        }
    }
}

impl FromStr for ConfigLocation {
    type Err = DaemonError;

    /// Parse a `<namespace>/<name>` ConfigMap reference.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(ConfigLocation::ConfigMap {
                    namespace: namespace.to_owned(),
                    name: name.to_owned(),
                })
            }
            _ => Err(DaemonError::ConfigMapRef(s.to_owned())),
        }
    }
}

impl std::fmt::Display for ConfigLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLocation::File(path) => write!(f, "file {}", path.display()),
            ConfigLocation::ConfigMap { namespace, name } => {
                write!(f, "configmap {namespace}/{name}")
            }
        }
    }
}

/// A resolved, loadable options source.
#[derive(Clone)]
pub enum ConfigSource {
    File(PathBuf),
    ConfigMap { api: Api<ConfigMap>, name: String },
    /// Fixed options, never reloaded.
    Fixed(ConfigOptions),
}

impl ConfigSource {
    /// Resolve a location; ConfigMap locations need a cluster client.
    pub fn resolve(location: &ConfigLocation, client: Option<&Client>) -> Result<Self, DaemonError> {
        match location {
            ConfigLocation::File(path) => Ok(ConfigSource::File(path.clone())),
            ConfigLocation::ConfigMap { namespace, name } => {
                let client = client.ok_or_else(|| {
                    DaemonError::KubeConfig(format!("{location} needs a cluster connection"))
                })?;
                Ok(ConfigSource::ConfigMap {
                    api: Api::namespaced(client.clone(), namespace),
                    name: name.clone(),
                })
            }
        }
    }

    /// Load options, creating a default ConfigMap when it is missing.
    pub async fn load(&self) -> Result<ConfigOptions, DaemonError> {
        self.load_with(true).await
    }

    /// Load options without writing anything; a missing ConfigMap yields
    /// defaults.
    pub async fn read(&self) -> Result<ConfigOptions, DaemonError> {
        self.load_with(false).await
    }

    async fn load_with(&self, create_missing: bool) -> Result<ConfigOptions, DaemonError> {
        match self {
            ConfigSource::Fixed(cfg) => Ok(cfg.clone()),
            ConfigSource::File(path) => {
                let path = path.clone();
                tokio::task::spawn_blocking(move || config::load_at(&path))
                    .await
                    .map_err(|err| DaemonError::Runtime(format!("config load join error: {err}")))?
                    .map_err(DaemonError::from)
            }
            ConfigSource::ConfigMap { api, name } => match api.get_opt(name).await? {
                Some(cm) => Ok(config::from_map(&cm.data.unwrap_or_default())?),
                None => {
                    let defaults = ConfigOptions::default();
                    if create_missing {
                        create_default(api, name, &defaults).await?;
                    }
                    Ok(defaults)
                }
            },
        }
    }
}

async fn create_default(
    api: &Api<ConfigMap>,
    name: &str,
    defaults: &ConfigOptions,
) -> Result<(), DaemonError> {
    let cm = default_config_map(name, defaults);
    match api.create(&PostParams::default(), &cm).await {
        Ok(_) => {
            tracing::info!(configmap = %name, "created default options ConfigMap");
            Ok(())
        }
        // Another replica created it first.
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
        Err(err) => Err(err.into()),
    }
}

pub fn default_config_map(name: &str, cfg: &ConfigOptions) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_owned()),
            ..ObjectMeta::default()
        },
        data: Some(config::to_map(cfg)),
        ..ConfigMap::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labelsync_core::{ConflictPolicy, SyncDirection};

    #[test]
    fn parses_configmap_reference() {
        let location: ConfigLocation = "kube-system/labelsync".parse().expect("valid");
        assert_eq!(
            location,
            ConfigLocation::ConfigMap {
                namespace: "kube-system".into(),
                name: "labelsync".into()
            }
        );
    }

    #[test]
    fn rejects_malformed_reference() {
        for bad in ["labelsync", "/name", "ns/", "a/b/c"] {
            assert!(
                matches!(bad.parse::<ConfigLocation>(), Err(DaemonError::ConfigMapRef(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn default_location_is_operator_configmap() {
        assert_eq!(
            ConfigLocation::default().to_string(),
            "configmap node-label-operator-system/node-label-operator"
        );
    }

    #[test]
    fn default_config_map_carries_every_key() {
        let cm = default_config_map("node-label-operator", &ConfigOptions::default());
        let data = cm.data.expect("data");
        assert_eq!(data.get("syncDirection").map(String::as_str), Some("arm-to-node"));
        assert_eq!(data.get("minSyncPeriod").map(String::as_str), Some("5m"));
        assert_eq!(data.len(), 6);
    }

    #[tokio::test]
    async fn file_source_reloads_on_every_load() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("labelsync.yaml");
        std::fs::write(&path, "syncDirection: two-way\n").expect("write");
        let source = ConfigSource::File(path.clone());

        assert_eq!(source.load().await.expect("load").sync_direction, SyncDirection::TwoWay);

        std::fs::write(&path, "conflictPolicy: ignore\n").expect("rewrite");
        let reloaded = source.load().await.expect("reload");
        assert_eq!(reloaded.sync_direction, SyncDirection::ArmToNode);
        assert_eq!(reloaded.conflict_policy, ConflictPolicy::Ignore);
    }

    #[tokio::test]
    async fn invalid_file_surfaces_config_error() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("labelsync.yaml");
        std::fs::write(&path, "conflictPolicy: coin-flip\n").expect("write");
        let err = ConfigSource::File(path).load().await.unwrap_err();
        assert!(matches!(err, DaemonError::Config(_)), "got: {err}");
    }
}
