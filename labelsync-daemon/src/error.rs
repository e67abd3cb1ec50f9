use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the daemon runtime and its Kubernetes / ARM adapters.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("could not load kubernetes client configuration: {0}")]
    KubeConfig(String),

    #[error("config error: {0}")]
    Config(#[from] labelsync_core::ConfigError),

    #[error("sync error: {0}")]
    Sync(#[from] labelsync_sync::SyncError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("invalid ConfigMap reference '{0}' (expected <namespace>/<name>)")]
    ConfigMapRef(String),

    #[error("daemon runtime error: {0}")]
    Runtime(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
