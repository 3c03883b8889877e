use crate::output::print_json;
use anyhow::Context;
use stagehand_core::changes::detect;
use stagehand_core::config::Config;
use std::path::Path;

pub fn run(
    root: &Path,
    paths: &[String],
    paths_from: Option<&Path>,
    all: bool,
    units: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let cfg = Config::load(root).context("failed to load config")?;
    let registry = cfg.registry()?;
    let (changes, overrides) = super::change_inputs(paths, paths_from, all, units)?;

    let affected = detect(&changes, &registry, &overrides)?;

    if json {
        print_json(&affected)?;
        return Ok(());
    }

    // One name per line so CI can feed the output straight into `deploy`.
    for name in &affected {
        println!("{name}");
    }
    Ok(())
}
