//! `labelsync plan <node>`: dry-run one pass and print what it would change.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use labelsync_sync::{planner::SkipReason, NodeSyncResult, PassStatus};

use super::{positive_duration, ConfigArgs};

/// Arguments for `labelsync plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Node to plan.
    pub node: String,

    /// Options source; defaults to the operator ConfigMap.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Deadline for the pass.
    #[arg(long, default_value = "60s", value_parser = positive_duration)]
    pub pass_timeout: Duration,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let location = self.config.location().unwrap_or_default();
        let result = labelsync_daemon::plan_blocking(&self.node, &location, self.pass_timeout)
            .with_context(|| format!("plan failed for node '{}'", self.node))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("failed to serialize plan JSON")?
            );
            return Ok(());
        }

        print_plan(&result);
        Ok(())
    }
}

#[derive(Tabled)]
struct ConflictRow {
    #[tabled(rename = "direction")]
    direction: String,
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "kept")]
    existing: String,
    #[tabled(rename = "rejected")]
    incoming: String,
}

fn print_plan(result: &NodeSyncResult) {
    let resource = result
        .resource
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown resource".to_string());
    println!("[dry-run] {} ({resource})", result.node_name.bold());

    if let PassStatus::Filtered { resource_group } = &result.status {
        println!(
            "  {} resource group '{resource_group}' is excluded by the filter",
            "·".bright_black()
        );
        return;
    }

    if !result.changed() {
        println!("  {} nothing to do", "✓".green());
    }

    if let Some(plan) = result.label_plan.as_ref().filter(|p| p.changed) {
        println!("  label patch ({}):", plan.delta.len());
        for (key, value) in &plan.delta {
            println!("    {} {key}={value}", "+".green());
        }
    }

    if let Some(plan) = result.tag_plan.as_ref().filter(|p| p.changed) {
        println!("  tag changes ({}):", plan.delta.len());
        for (key, value) in &plan.delta {
            println!("    {} {key}={value}", "+".green());
        }
    }

    let conflicts: Vec<ConflictRow> = result
        .conflicts()
        .map(|c| ConflictRow {
            direction: c.direction.to_string(),
            key: c.key.clone(),
            existing: c.existing.clone(),
            incoming: c.incoming.clone(),
        })
        .collect();
    if !conflicts.is_empty() {
        println!("  {} conflicts:", conflicts.len().to_string().yellow().bold());
        let mut table = Table::new(conflicts);
        table.with(Style::rounded());
        println!("{table}");
    }

    let skipped = result
        .label_plan
        .iter()
        .flat_map(|p| p.skipped.iter())
        .chain(result.tag_plan.iter().flat_map(|p| p.skipped.iter()));
    for skip in skipped {
        println!(
            "  {} {} ({})",
            "!".yellow(),
            skip.key,
            skip_reason(skip.reason)
        );
    }
}

fn skip_reason(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::InvalidTagName => "not a valid tag name",
        SkipReason::InvalidLabelKey => "does not convert to a valid label key",
        SkipReason::InvalidLabelValue => "value is not a valid label value",
        SkipReason::TagLimitReached => "resource already has the maximum number of tags",
        SkipReason::TruncatedTagName => "truncated copy of a longer tag name",
    }
}
