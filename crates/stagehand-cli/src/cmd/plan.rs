use crate::output::{print_json, print_table};
use anyhow::Context;
use stagehand_core::config::Config;
use stagehand_core::plan::plan;
use std::path::Path;

pub fn run(root: &Path, stage: &str, units: &[String], all: bool, json: bool) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    let cfg = Config::load(root).context("failed to load config")?;
    let registry = cfg.registry()?;

    let requested: Vec<String> = if all {
        registry.units().iter().map(|u| u.name.clone()).collect()
    } else if units.is_empty() {
        anyhow::bail!("no units requested; pass unit names or --all");
    } else {
        units.to_vec()
    };

    let p = plan(&registry, &requested, stage)?;

    if json {
        print_json(&p)?;
        return Ok(());
    }

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(p.ordered_units.len());
    for (i, name) in p.ordered_units.iter().enumerate() {
        let unit = registry.get(name)?;
        rows.push(vec![
            format!("{}", i + 1),
            name.clone(),
            unit.category.to_string(),
            unit.stack_name(stage),
        ]);
    }
    print_table(&["#", "UNIT", "CATEGORY", "STACK"], rows);
    Ok(())
}
