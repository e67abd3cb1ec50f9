//! labelsync daemon runtime: node watcher + periodic ticker + pass processor,
//! with Kubernetes and Azure Resource Manager collaborators.

pub mod arm;
pub mod config_source;
mod error;
pub mod kube_client;
mod runtime;

pub use arm::{ArmCompute, ManagedIdentity, StaticToken, TokenSource};
pub use config_source::{ConfigLocation, ConfigSource};
pub use error::DaemonError;
pub use kube_client::{KubeEventRecorder, KubeNodes};
pub use runtime::{
    init_tracing, load_config, load_config_blocking, plan, plan_blocking, run, start_blocking,
    DaemonOptions, PassSummary, DEBOUNCE_WINDOW,
};
