use crate::output::{print_json, print_table};
use anyhow::Context;
use stagehand_core::config::Config;
use stagehand_core::context::RunContext;
use stagehand_core::validate::{validate, DynamoCli};
use std::path::Path;

pub fn run(
    root: &Path,
    stage: &str,
    units: Option<&str>,
    region: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    let cfg = Config::load(root).context("failed to load config")?;
    let registry = cfg.registry()?;
    let region = region.unwrap_or(&cfg.region).to_string();
    let ctx = RunContext::new(stage, region.clone());

    let filter: Option<Vec<String>> = units.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    });

    let probe = DynamoCli::new(&region, cfg.retry).context("data layer probe unavailable")?;
    let report = validate(&ctx, &registry, filter.as_deref(), &probe)?;

    if json {
        print_json(&report)?;
    } else {
        let mut rows = Vec::new();
        for (group, tables) in &report.expected {
            for table in tables {
                let status = if report.found.contains(table) {
                    "found"
                } else {
                    "MISSING"
                };
                rows.push(vec![group.clone(), table.clone(), status.to_string()]);
            }
        }
        print_table(&["UNIT", "TABLE", "STATUS"], rows);
        for warning in &report.index_warnings {
            println!("warn: {warning}");
        }
        println!(
            "\n{} expected, {} found, {} missing",
            report.found.len() + report.missing.len(),
            report.found.len(),
            report.missing.len()
        );
    }

    if !report.ok() {
        anyhow::bail!("missing tables: {}", report.missing.join(", "));
    }
    Ok(())
}
