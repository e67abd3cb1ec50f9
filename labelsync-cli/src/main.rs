//! labelsync: keep Azure compute tags and Kubernetes node labels in sync.
//!
//! # Usage
//!
//! ```text
//! labelsync run [--config <file> | --config-map <ns>/<name>] [--interval 1m] [--pass-timeout 60s] [--concurrency 4] [--log-json]
//! labelsync plan <node> [--config <file> | --config-map <ns>/<name>] [--json]
//! labelsync config show [--config <file> | --config-map <ns>/<name>] [--json]
//! labelsync config init <path> [--force]
//! labelsync convert --tag <name>... | --label <name>... [--config <file>] [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{config::ConfigCommand, convert::ConvertArgs, plan::PlanArgs, run::RunArgs};

#[derive(Parser, Debug)]
#[command(
    name = "labelsync",
    version,
    about = "Sync Azure VM and scale set tags with Kubernetes node labels",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reconciler in the foreground until interrupted.
    Run(RunArgs),

    /// Show what one pass would change on a node, without writing.
    Plan(PlanArgs),

    /// Inspect or create options files.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Preview tag name and label key conversion.
    Convert(ConvertArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Config { command } => commands::config::run(command),
        Commands::Convert(args) => args.run(),
    }
}
