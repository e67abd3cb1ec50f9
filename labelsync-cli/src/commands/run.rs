//! `labelsync run`: the reconciler daemon in the foreground.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use labelsync_daemon::DaemonOptions;

use super::{positive_duration, ConfigArgs};

/// Arguments for `labelsync run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Options source; defaults to the operator ConfigMap.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Period of the full-cluster pass.
    #[arg(long, default_value = "1m", value_parser = positive_duration)]
    pub interval: Duration,

    /// Deadline for each node's pass.
    #[arg(long, default_value = "60s", value_parser = positive_duration)]
    pub pass_timeout: Duration,

    /// Maximum number of nodes reconciled at once.
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let opts = DaemonOptions {
            config: self.config.location().unwrap_or_default(),
            interval: self.interval,
            pass_timeout: self.pass_timeout,
            concurrency: self.concurrency.max(1),
            log_json: self.log_json,
        };
        labelsync_daemon::start_blocking(opts).context("labelsync daemon failed")
    }
}
