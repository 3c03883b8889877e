pub mod config;
pub mod deploy;
pub mod detect;
pub mod params;
pub mod plan;
pub mod validate;

use anyhow::Context;
use stagehand_core::changes::{ChangeSet, DeployOverride};
use stagehand_core::config::{Config, StoreBackend};
use stagehand_core::params::{FileStore, MemoryStore, ParameterStore, SsmCliStore};
use stagehand_core::types::Stage;
use std::path::Path;
use std::str::FromStr;

pub fn parse_stage(s: &str) -> anyhow::Result<Stage> {
    Stage::from_str(s).map_err(Into::into)
}

/// Open the parameter store backend named in the config. File paths are
/// resolved relative to the project root.
pub fn open_store(cfg: &Config, root: &Path, region: &str) -> anyhow::Result<Box<dyn ParameterStore>> {
    Ok(match &cfg.store {
        StoreBackend::Ssm => Box::new(
            SsmCliStore::new(region, cfg.retry).context("ssm store unavailable")?,
        ),
        StoreBackend::File { path } => {
            let path = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            Box::new(FileStore::new(path))
        }
        StoreBackend::Memory => Box::new(MemoryStore::new()),
    })
}

/// Assemble the change/override inputs shared by `detect` and `deploy`.
pub fn change_inputs(
    paths: &[String],
    paths_from: Option<&Path>,
    all: bool,
    units: Option<&str>,
) -> anyhow::Result<(ChangeSet, DeployOverride)> {
    let overrides = if all {
        DeployOverride::All
    } else if let Some(list) = units {
        DeployOverride::Units(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
        )
    } else {
        DeployOverride::None
    };

    let mut touched: Vec<String> = paths.to_vec();
    if let Some(file) = paths_from {
        let data = if file == Path::new("-") {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?
        };
        touched.extend(
            data.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from),
        );
    }

    Ok((ChangeSet::new(touched), overrides))
}
