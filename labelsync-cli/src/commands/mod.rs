pub mod config;
pub mod convert;
pub mod plan;
pub mod run;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use labelsync_core::ConfigOptions;
use labelsync_daemon::ConfigLocation;

/// `humantime` duration that must be greater than zero.
pub fn positive_duration(s: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("must be greater than zero".to_string());
    }
    Ok(duration)
}

/// Where options come from; shared by every subcommand that reads them.
#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// YAML options file.
    #[arg(long, value_name = "FILE", conflicts_with = "config_map")]
    pub config: Option<PathBuf>,

    /// Options ConfigMap as `<namespace>/<name>`.
    #[arg(long, value_name = "NS/NAME")]
    pub config_map: Option<ConfigLocation>,
}

impl ConfigArgs {
    /// The explicitly requested location, if any.
    pub fn location(&self) -> Option<ConfigLocation> {
        match (&self.config, &self.config_map) {
            (Some(path), _) => Some(ConfigLocation::File(path.clone())),
            (None, Some(location)) => Some(location.clone()),
            (None, None) => None,
        }
    }

    /// Options from the requested location, or built-in defaults.
    ///
    /// Returns a description of the source alongside the options.
    pub fn effective(&self) -> Result<(String, ConfigOptions)> {
        match self.location() {
            None => Ok(("built-in defaults".to_string(), ConfigOptions::default())),
            Some(location) => {
                let cfg = labelsync_daemon::load_config_blocking(&location)
                    .with_context(|| format!("failed to load options from {location}"))?;
                Ok((location.to_string(), cfg))
            }
        }
    }
}
