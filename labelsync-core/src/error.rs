//! Error types for labelsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `syncDirection` is not one of the recognised values.
    #[error("invalid sync direction '{0}'; expected: arm-to-node, node-to-arm, two-way")]
    InvalidSyncDirection(String),

    /// `conflictPolicy` is not one of the recognised values.
    #[error(
        "invalid conflict policy '{0}'; expected: arm-precedence, node-precedence, ignore"
    )]
    InvalidConflictPolicy(String),

    /// `minSyncPeriod` could not be parsed as a duration.
    #[error("invalid minSyncPeriod '{value}': {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    /// `labelPrefix` exceeds the Kubernetes label prefix limit.
    #[error("label prefix is over {max} characters (got {len})")]
    LabelPrefixTooLong { len: usize, max: usize },

    /// `labelPrefix` is not a DNS subdomain.
    #[error("label prefix '{0}' is not a valid DNS subdomain")]
    InvalidLabelPrefix(String),

    /// Underlying I/O failure, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file did not exist at the expected path.
    #[error("config not found at {path}")]
    NotFound { path: PathBuf },

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A key/value mapping could not be read as configuration.
    #[error("malformed config mapping: {0}")]
    Mapping(#[from] serde_json::Error),
}

/// Errors from parsing a node's provider ID into a resource identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderIdError {
    /// The node carries no provider ID at all.
    #[error("provider ID is empty")]
    Empty,

    /// The provider ID does not use the `azure://` scheme.
    #[error("provider ID '{0}' does not use the azure:// scheme")]
    UnsupportedScheme(String),

    /// The path segments do not describe a compute resource.
    #[error("malformed provider ID '{provider_id}': {reason}")]
    Malformed { provider_id: String, reason: String },

    /// The resource type segment is neither a VM nor a scale set.
    #[error("unsupported resource type '{0}'")]
    UnsupportedResourceType(String),
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
