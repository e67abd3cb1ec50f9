//! `labelsync convert`: preview how names cross between tag and label space.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use labelsync_core::{
    naming::{label_key_is_valid, label_name_to_tag_name, tag_name_is_valid, tag_name_to_label_name},
    ConfigOptions,
};

use super::ConfigArgs;

/// Arguments for `labelsync convert`.
#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Tag name to convert to a label key (repeatable).
    #[arg(long = "tag", value_name = "NAME", required_unless_present = "labels", conflicts_with = "labels")]
    pub tags: Vec<String>,

    /// Label key to convert to a tag name (repeatable).
    #[arg(long = "label", value_name = "KEY")]
    pub labels: Vec<String>,

    /// Options source for the prefixes; built-in defaults when omitted.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct Conversion {
    #[tabled(rename = "from")]
    from: String,
    #[tabled(rename = "to")]
    to: String,
    #[tabled(rename = "valid")]
    valid: bool,
}

impl ConvertArgs {
    pub fn run(self) -> Result<()> {
        let (_, cfg) = self.config.effective()?;
        let rows: Vec<Conversion> = if self.tags.is_empty() {
            self.labels.iter().map(|l| label_to_tag(l, &cfg)).collect()
        } else {
            self.tags.iter().map(|t| tag_to_label(t, &cfg)).collect()
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize conversions")?
            );
            return Ok(());
        }

        let invalid = rows.iter().filter(|r| !r.valid).count();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        if invalid > 0 {
            println!("{} {invalid} name(s) would be skipped", "!".yellow());
        }
        Ok(())
    }
}

fn tag_to_label(tag: &str, cfg: &ConfigOptions) -> Conversion {
    let label = tag_name_to_label_name(tag, cfg);
    Conversion {
        valid: tag_name_is_valid(tag) && label_key_is_valid(&label),
        from: tag.to_owned(),
        to: label,
    }
}

fn label_to_tag(label: &str, cfg: &ConfigOptions) -> Conversion {
    let tag = label_name_to_tag_name(label, cfg);
    Conversion {
        valid: tag_name_is_valid(&tag),
        from: label.to_owned(),
        to: tag,
    }
}
