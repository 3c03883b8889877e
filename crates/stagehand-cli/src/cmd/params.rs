use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use stagehand_core::config::Config;
use stagehand_core::context::RunContext;
use stagehand_core::error::StagehandError;
use stagehand_core::outputs::CloudFormationCli;
use stagehand_core::params::{parameter_key, reconcile, ParameterRecord};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Subcommand)]
pub enum ParamsSubcommand {
    /// Write one parameter under its deterministic key (upsert)
    Create {
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "tsa")]
        namespace: String,
        /// Key grouping segment, e.g. api-urls or table-names
        #[arg(long)]
        category: String,
        /// Logical name, the last key segment
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        region: Option<String>,
    },
    /// Alias of create: parameters are always upserted, never appended
    Update {
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "tsa")]
        namespace: String,
        #[arg(long)]
        category: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        region: Option<String>,
    },
    /// Delete one parameter, or a whole stage prefix with --all
    Delete {
        #[arg(long)]
        stage: String,
        #[arg(long, default_value = "tsa")]
        namespace: String,
        #[arg(long, requires = "name")]
        category: Option<String>,
        #[arg(long, requires = "category")]
        name: Option<String>,
        /// Delete every key under /{namespace}/{stage}/
        #[arg(long, conflicts_with = "name")]
        all: bool,
        /// Confirm the destructive action (no interactive prompt exists)
        #[arg(long)]
        yes: bool,
        #[arg(long)]
        region: Option<String>,
    },
    /// List parameters for a stage
    List {
        #[arg(long)]
        stage: String,
        /// Restrict to one namespace; default lists every namespace the
        /// registry publishes to
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Pull stack outputs and republish them into the store
    Sync {
        #[arg(long)]
        stage: String,
        /// Comma-separated unit names; default is every output-owning unit
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: ParamsSubcommand, json: bool) -> anyhow::Result<()> {
    let cfg = Config::load(root).context("failed to load config")?;
    match subcmd {
        ParamsSubcommand::Create {
            stage,
            namespace,
            category,
            name,
            value,
            description,
            region,
        }
        | ParamsSubcommand::Update {
            stage,
            namespace,
            category,
            name,
            value,
            description,
            region,
        } => upsert(
            root, &cfg, &stage, &namespace, &category, &name, &value, &description,
            region.as_deref(),
        ),
        ParamsSubcommand::Delete {
            stage,
            namespace,
            category,
            name,
            all,
            yes,
            region,
        } => delete(
            root,
            &cfg,
            &stage,
            &namespace,
            category.as_deref(),
            name.as_deref(),
            all,
            yes,
            region.as_deref(),
        ),
        ParamsSubcommand::List {
            stage,
            namespace,
            region,
        } => list(root, &cfg, &stage, namespace.as_deref(), region.as_deref(), json),
        ParamsSubcommand::Sync {
            stage,
            units,
            region,
        } => sync(root, &cfg, &stage, units.as_deref(), region.as_deref(), json),
    }
}

#[allow(clippy::too_many_arguments)]
fn upsert(
    root: &Path,
    cfg: &Config,
    stage: &str,
    namespace: &str,
    category: &str,
    name: &str,
    value: &str,
    description: &str,
    region: Option<&str>,
) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    let region = region.unwrap_or(&cfg.region);
    let store = super::open_store(cfg, root, region)?;
    let record = ParameterRecord {
        key: parameter_key(namespace, stage, category, name),
        value: value.to_string(),
        description: description.to_string(),
    };
    store.put(&record)?;
    println!("wrote {}", record.key);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn delete(
    root: &Path,
    cfg: &Config,
    stage: &str,
    namespace: &str,
    category: Option<&str>,
    name: Option<&str>,
    all: bool,
    confirmed: bool,
    region: Option<&str>,
) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    if !confirmed {
        return Err(StagehandError::ConfirmationRequired.into());
    }
    let region = region.unwrap_or(&cfg.region);
    let store = super::open_store(cfg, root, region)?;

    if all {
        let prefix = format!("/{namespace}/{stage}/");
        let records = store.list(&prefix)?;
        if records.is_empty() {
            println!("nothing under {prefix}");
            return Ok(());
        }
        for record in &records {
            store.delete(&record.key)?;
            println!("deleted {}", record.key);
        }
        return Ok(());
    }

    let (Some(category), Some(name)) = (category, name) else {
        anyhow::bail!("pass --category and --name, or --all");
    };
    let key = parameter_key(namespace, stage, category, name);
    if store.delete(&key)? {
        println!("deleted {key}");
        Ok(())
    } else {
        anyhow::bail!("no such parameter: {key}");
    }
}

fn list(
    root: &Path,
    cfg: &Config,
    stage: &str,
    namespace: Option<&str>,
    region: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    let region = region.unwrap_or(&cfg.region);
    let store = super::open_store(cfg, root, region)?;
    let registry = cfg.registry()?;

    let namespaces: BTreeSet<String> = match namespace {
        Some(ns) => BTreeSet::from([ns.to_string()]),
        None => registry
            .units()
            .iter()
            .flat_map(|u| u.outputs.iter().map(|o| o.namespace.clone()))
            .collect(),
    };

    let mut records = Vec::new();
    for ns in &namespaces {
        records.extend(store.list(&format!("/{ns}/{stage}/"))?);
    }
    records.sort_by(|a, b| a.key.cmp(&b.key));

    if json {
        print_json(&records)?;
        return Ok(());
    }
    if records.is_empty() {
        println!("no parameters for stage {stage}");
        return Ok(());
    }
    let rows = records
        .into_iter()
        .map(|r| vec![r.key, r.value])
        .collect();
    print_table(&["KEY", "VALUE"], rows);
    Ok(())
}

fn sync(
    root: &Path,
    cfg: &Config,
    stage: &str,
    units: Option<&str>,
    region: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let stage = super::parse_stage(stage)?;
    let region = region.unwrap_or(&cfg.region).to_string();
    let registry = cfg.registry()?;
    let ctx = RunContext::new(stage, region.clone());

    let unit_names: Vec<String> = match units {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        None => registry
            .units()
            .iter()
            .filter(|u| !u.outputs.is_empty())
            .map(|u| u.name.clone())
            .collect(),
    };

    let outputs = CloudFormationCli::new(&region, cfg.retry)
        .context("stack output introspection unavailable")?;
    let store = super::open_store(cfg, root, &region)?;
    let report = reconcile(&ctx, &registry, &unit_names, &outputs, store.as_ref())?;

    if json {
        print_json(&report)?;
    } else {
        for record in &report.written {
            println!("wrote {}", record.key);
        }
        for key in &report.missing {
            println!("missing output for {key}");
        }
        for (key, reason) in &report.failed {
            println!("FAILED {key}: {reason}");
        }
    }

    if !report.ok() {
        anyhow::bail!("{} parameter(s) failed to reconcile", report.failed.len());
    }
    Ok(())
}
