//! labelsync core library — domain types, configuration, naming rules, errors.
//!
//! Public API surface:
//! - [`types`] — sync direction, conflict policy, [`ConfigOptions`], resource identity
//! - [`config`] — load / validate / save configuration
//! - [`naming`] — tag-space ↔ label-space conversion and validity predicates
//! - [`provider`] — node provider-ID parsing
//! - [`error`] — [`ConfigError`], [`ProviderIdError`]

pub mod config;
pub mod error;
pub mod naming;
pub mod provider;
pub mod types;

pub use error::{ConfigError, ProviderIdError};
pub use provider::parse_provider_id;
pub use types::{
    ConfigOptions, ConflictPolicy, LabelMap, ResourceId, ResourceKind, SyncDirection, TagMap,
};
