//! The full pipeline: detect → plan → apply → reconcile → validate,
//! with a summary that enumerates every unit outcome and every expected
//! table, even when parts of the run fail.

use crate::output::{print_heading, print_json, print_table};
use anyhow::Context;
use serde::Serialize;
use stagehand_core::changes::detect;
use stagehand_core::config::Config;
use stagehand_core::context::RunContext;
use stagehand_core::executor::{apply, ApplyOptions, ApplyReport, CommandProvisioner};
use stagehand_core::outputs::CloudFormationCli;
use stagehand_core::params::{reconcile, ReconcileReport};
use stagehand_core::plan::plan;
use stagehand_core::types::UnitOutcome;
use stagehand_core::validate::{validate, DynamoCli, ValidationReport};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub struct DeployArgs<'a> {
    pub stage: &'a str,
    pub paths: &'a [String],
    pub paths_from: Option<&'a Path>,
    pub all: bool,
    pub units: Option<&'a str>,
    pub region: Option<&'a str>,
    pub max_parallelism: Option<usize>,
    pub dry_run: bool,
    pub skip_reconcile: bool,
    pub skip_validate: bool,
}

#[derive(Serialize)]
struct PipelineSummary {
    run_id: String,
    stage: String,
    apply: ApplyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    reconcile: Option<ReconcileReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<ValidationReport>,
}

pub fn run(root: &Path, args: DeployArgs<'_>, json: bool) -> anyhow::Result<()> {
    let stage = super::parse_stage(args.stage)?;
    let cfg = Config::load(root).context("failed to load config")?;
    let registry = cfg.registry()?;
    let (changes, overrides) = super::change_inputs(args.paths, args.paths_from, args.all, args.units)?;

    let affected = detect(&changes, &registry, &overrides)?;
    if affected.is_empty() {
        // No-op runs stop here; nothing is planned or provisioned.
        if !json {
            println!("No affected units; nothing to deploy.");
        }
        return Ok(());
    }

    let execution_plan = plan(&registry, &affected, stage)?;

    if args.dry_run {
        crate::cmd::plan::run(
            root,
            args.stage,
            &execution_plan.ordered_units,
            false,
            json,
        )?;
        return Ok(());
    }

    let region = args.region.unwrap_or(&cfg.region).to_string();
    let ctx = RunContext::new(stage, region.clone());
    let opts = ApplyOptions {
        max_parallelism: args.max_parallelism.unwrap_or(cfg.max_parallelism),
        unit_timeout: Duration::from_secs(cfg.unit_timeout_seconds),
    };
    let provisioner = Arc::new(CommandProvisioner::new(cfg.provisioner.clone()));

    tracing::info!(run_id = %ctx.run_id, stage = %stage, units = execution_plan.len(), "starting deployment");

    let runtime = tokio::runtime::Runtime::new().context("failed to start runtime")?;
    let report = runtime.block_on(apply(&execution_plan, &registry, provisioner, &ctx, &opts))?;

    let succeeded: Vec<String> = report
        .outcomes
        .iter()
        .filter(|(_, o)| o.is_success())
        .map(|(name, _)| name.clone())
        .collect();

    let reconcile_report = if args.skip_reconcile {
        None
    } else {
        let outputs = CloudFormationCli::new(&region, cfg.retry)
            .context("stack output introspection unavailable")?;
        let store = super::open_store(&cfg, root, &region)?;
        Some(reconcile(&ctx, &registry, &succeeded, &outputs, store.as_ref())?)
    };

    let validation_report = if args.skip_validate {
        None
    } else {
        let probe = DynamoCli::new(&region, cfg.retry).context("data layer probe unavailable")?;
        Some(validate(
            &ctx,
            &registry,
            Some(&execution_plan.ordered_units),
            &probe,
        )?)
    };

    let summary = PipelineSummary {
        run_id: ctx.run_id.clone(),
        stage: stage.to_string(),
        apply: report,
        reconcile: reconcile_report,
        validation: validation_report,
    };

    if json {
        print_json(&summary)?;
    } else {
        print_summary(&summary);
    }

    let apply_ok = summary.apply.ok();
    let reconcile_ok = summary.reconcile.as_ref().map_or(true, |r| r.ok());
    let validate_ok = summary.validation.as_ref().map_or(true, |v| v.ok());
    if !apply_ok {
        anyhow::bail!(
            "deployment incomplete: re-run for {}",
            summary.apply.failed_subtree().join(", ")
        );
    }
    if !reconcile_ok {
        anyhow::bail!("parameter reconciliation had failures");
    }
    if !validate_ok {
        anyhow::bail!(
            "validation found missing tables: {}",
            summary.validation.as_ref().map(|v| v.missing.join(", ")).unwrap_or_default()
        );
    }
    Ok(())
}

fn print_summary(summary: &PipelineSummary) {
    print_heading(&format!(
        "Deployment summary for stage {} (run {})",
        summary.stage, summary.run_id
    ));

    let rows: Vec<Vec<String>> = summary
        .apply
        .outcomes
        .iter()
        .map(|(name, outcome)| {
            let detail = match outcome {
                UnitOutcome::Success => String::new(),
                UnitOutcome::Failed { reason } | UnitOutcome::Skipped { reason } => reason.clone(),
            };
            vec![name.clone(), outcome.label().to_string(), detail]
        })
        .collect();
    print_table(&["UNIT", "OUTCOME", "DETAIL"], rows);

    if let Some(r) = &summary.reconcile {
        print_heading("Parameters");
        for record in &r.written {
            println!("  wrote {}", record.key);
        }
        for key in &r.missing {
            println!("  missing output for {key}");
        }
        for (key, reason) in &r.failed {
            println!("  FAILED {key}: {reason}");
        }
        if r.written.is_empty() && r.missing.is_empty() && r.failed.is_empty() {
            println!("  nothing to reconcile");
        }
    }

    if let Some(v) = &summary.validation {
        print_heading("Tables");
        for table in &v.found {
            println!("  found   {table}");
        }
        for table in &v.missing {
            println!("  MISSING {table}");
        }
        for warning in &v.index_warnings {
            println!("  warn    {warning}");
        }
        if v.found.is_empty() && v.missing.is_empty() {
            println!("  no tables expected for the deployed units");
        }
    }
}
