use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use stagehand_core::config::{Config, WarnLevel};
use stagehand_core::io;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a default stagehand.yaml if none exists
    Init,
    /// Print the effective configuration
    Show,
    /// Check the configuration and unit graph
    Validate,
}

pub fn run(root: &Path, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init => init(root),
        ConfigSubcommand::Show => show(root, json),
        ConfigSubcommand::Validate => validate(root, json),
    }
}

fn init(root: &Path) -> anyhow::Result<()> {
    let path = Config::path(root);
    let data = serde_yaml::to_string(&Config::default())?;
    if io::write_if_missing(&path, data.as_bytes())? {
        println!("wrote {}", path.display());
    } else {
        println!("{} already exists", path.display());
    }
    Ok(())
}

fn show(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = Config::load(root).context("failed to load config")?;
    if json {
        print_json(&cfg)?;
    } else {
        print!("{}", serde_yaml::to_string(&cfg)?);
    }
    Ok(())
}

fn validate(root: &Path, json: bool) -> anyhow::Result<()> {
    let cfg = Config::load(root).context("failed to load config")?;
    let warnings = cfg.validate();

    if json {
        print_json(&warnings)?;
    } else if warnings.is_empty() {
        println!("configuration ok");
    } else {
        let rows = warnings
            .iter()
            .map(|w| {
                let level = match w.level {
                    WarnLevel::Warning => "warning",
                    WarnLevel::Error => "error",
                };
                vec![level.to_string(), w.message.clone()]
            })
            .collect();
        print_table(&["LEVEL", "MESSAGE"], rows);
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("configuration has errors");
    }
    Ok(())
}
