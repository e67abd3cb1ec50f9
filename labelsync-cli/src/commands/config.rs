//! `labelsync config show|init`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tabled::{settings::Style, Table, Tabled};

use labelsync_core::{config, ConfigOptions};

use super::ConfigArgs;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective options.
    Show(ShowArgs),

    /// Write a default options file.
    Init(InitArgs),
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Options source; built-in defaults when omitted.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path of the YAML file to create.
    pub path: PathBuf,

    /// Overwrite an existing file.
    #[arg(long)]
    pub force: bool,
}

pub fn run(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show(args) => show(args),
        ConfigCommand::Init(args) => init(args),
    }
}

#[derive(Tabled)]
struct OptionRow {
    #[tabled(rename = "option")]
    key: String,
    #[tabled(rename = "value")]
    value: String,
}

fn show(args: ShowArgs) -> Result<()> {
    let (source, cfg) = args.config.effective()?;
    let values = config::to_map(&cfg);

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&values).context("failed to serialize options JSON")?
        );
        return Ok(());
    }

    println!("Options from {source}");
    let rows: Vec<OptionRow> = values
        .into_iter()
        .map(|(key, value)| OptionRow { key, value })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

fn init(args: InitArgs) -> Result<()> {
    if args.path.exists() && !args.force {
        bail!(
            "'{}' already exists; pass --force to overwrite",
            args.path.display()
        );
    }
    config::save_at(&args.path, &ConfigOptions::default())
        .with_context(|| format!("failed to write '{}'", args.path.display()))?;
    println!("✓ Wrote default options to {}", args.path.display());
    Ok(())
}
