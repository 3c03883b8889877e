//! Dependency-gated execution of a plan against the provisioning tool.
//!
//! A unit starts only once all of its dependencies have reached `Success`.
//! Units with no path between them run concurrently, bounded by
//! `max_parallelism` (default 1, which reproduces a fully serialized
//! pipeline). A unit's failure marks its transitive dependents `Skipped`
//! and leaves unrelated branches running; in-flight provisioning calls are
//! always awaited to a terminal state rather than killed between units.

use crate::context::RunContext;
use crate::error::{Result, StagehandError};
use crate::plan::ExecutionPlan;
use crate::registry::{DeployableUnit, Registry};
use crate::types::{Stage, UnitOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Result of one provisioning call. A non-zero exit from the tool is a
/// recorded failure, not an `Err`; `Err` is reserved for spawn and
/// transport faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionOutput {
    pub success: bool,
    pub detail: String,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        unit: &DeployableUnit,
        stack_name: &str,
        ctx: &RunContext,
    ) -> Result<ProvisionOutput>;
}

/// Runs a configurable command template per unit, e.g.
/// `cdk deploy {stack} --require-approval never -c stage={stage}`.
/// Placeholders: `{stack}`, `{stage}`, `{region}`, `{unit}`.
pub struct CommandProvisioner {
    template: String,
}

impl CommandProvisioner {
    pub fn new(template: impl Into<String>) -> Self {
        CommandProvisioner {
            template: template.into(),
        }
    }

    fn render(&self, unit: &DeployableUnit, stack_name: &str, ctx: &RunContext) -> Vec<String> {
        self.template
            .split_whitespace()
            .map(|tok| {
                tok.replace("{stack}", stack_name)
                    .replace("{stage}", ctx.stage.as_str())
                    .replace("{region}", &ctx.region)
                    .replace("{unit}", &unit.name)
            })
            .collect()
    }
}

#[async_trait]
impl Provisioner for CommandProvisioner {
    async fn provision(
        &self,
        unit: &DeployableUnit,
        stack_name: &str,
        ctx: &RunContext,
    ) -> Result<ProvisionOutput> {
        let argv = self.render(unit, stack_name, ctx);
        let Some((program, args)) = argv.split_first() else {
            return Err(StagehandError::SpawnFailed {
                command: self.template.clone(),
                reason: "empty provisioner command".into(),
            });
        };

        tracing::info!(unit = %unit.name, stack = %stack_name, "provisioning");

        let output = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| StagehandError::SpawnFailed {
                command: program.clone(),
                reason: e.to_string(),
            })?;

        let success = output.status.success();
        let detail = if success {
            String::from_utf8_lossy(&output.stdout).trim_end().to_string()
        } else {
            // Keep the tail of stderr for the run summary.
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(10)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            format!(
                "exit {}: {}",
                output.status.code().unwrap_or(-1),
                tail.trim()
            )
        };

        Ok(ProvisionOutput { success, detail })
    }
}

// ---------------------------------------------------------------------------
// ApplyReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub stage: Stage,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    /// (unit name, outcome) in plan order, one entry per planned unit.
    pub outcomes: Vec<(String, UnitOutcome)>,
}

impl ApplyReport {
    pub fn ok(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    pub fn outcome_of(&self, unit: &str) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == unit)
            .map(|(_, o)| o)
    }

    /// Units an operator would re-run: failed plus skipped.
    pub fn failed_subtree(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub max_parallelism: usize,
    pub unit_timeout: Duration,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            max_parallelism: 1,
            unit_timeout: Duration::from_secs(1800),
        }
    }
}

pub async fn apply(
    plan: &ExecutionPlan,
    registry: &Registry,
    provisioner: Arc<dyn Provisioner>,
    ctx: &RunContext,
    opts: &ApplyOptions,
) -> Result<ApplyReport> {
    let started_at = Utc::now();
    let semaphore = Arc::new(Semaphore::new(opts.max_parallelism.max(1)));

    let mut outcomes: HashMap<String, UnitOutcome> = HashMap::new();
    let mut pending: Vec<String> = plan.ordered_units.clone();
    let mut running: JoinSet<(String, Result<ProvisionOutput>)> = JoinSet::new();

    while outcomes.len() < plan.ordered_units.len() {
        // Dispatch every unit whose dependencies have settled.
        let mut still_pending = Vec::new();
        for name in pending {
            let unit = registry.get(&name)?;
            let in_plan = |d: &String| plan.ordered_units.contains(d);
            let blocked_by = unit.dependencies.iter().filter(|d| in_plan(d)).find(|d| {
                matches!(
                    outcomes.get(*d),
                    Some(UnitOutcome::Failed { .. }) | Some(UnitOutcome::Skipped { .. })
                )
            });
            if let Some(dep) = blocked_by {
                outcomes.insert(
                    name.clone(),
                    UnitOutcome::Skipped {
                        reason: format!("dependency '{dep}' did not succeed"),
                    },
                );
                continue;
            }
            let ready = unit
                .dependencies
                .iter()
                .filter(|d| in_plan(d))
                .all(|d| matches!(outcomes.get(d), Some(UnitOutcome::Success)));
            if !ready {
                still_pending.push(name);
                continue;
            }

            let unit = unit.clone();
            let stack_name = unit.stack_name(plan.stage);
            let ctx = ctx.clone();
            let provisioner = Arc::clone(&provisioner);
            let semaphore = Arc::clone(&semaphore);
            let timeout = opts.unit_timeout;
            running.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                let result =
                    tokio::time::timeout(timeout, provisioner.provision(&unit, &stack_name, &ctx))
                        .await
                        .unwrap_or_else(|_| {
                            Ok(ProvisionOutput {
                                success: false,
                                detail: format!("timed out after {}s", timeout.as_secs()),
                            })
                        });
                (unit.name, result)
            });
        }
        pending = still_pending;

        if outcomes.len() == plan.ordered_units.len() {
            break;
        }

        // Wait for one in-flight unit to settle. An empty join set here
        // would mean undispatchable pending units, which the planner's
        // cycle check rules out.
        let Some(joined) = running.join_next().await else {
            if pending.is_empty() {
                break;
            }
            return Err(StagehandError::DependencyCycle(pending.remove(0)));
        };
        let (name, result) = joined.map_err(|e| StagehandError::SpawnFailed {
            command: "provisioner task".into(),
            reason: e.to_string(),
        })?;

        let outcome = match result {
            Ok(out) if out.success => UnitOutcome::Success,
            Ok(out) => UnitOutcome::Failed { reason: out.detail },
            // Spawn/transport faults are terminal for this unit only.
            Err(e) => UnitOutcome::Failed {
                reason: e.to_string(),
            },
        };
        if let UnitOutcome::Failed { reason } = &outcome {
            tracing::warn!(unit = %name, %reason, "unit failed");
        }
        outcomes.insert(name, outcome);
    }

    // Drain any stragglers so nothing is abandoned mid-provisioning.
    while let Some(joined) = running.join_next().await {
        if let Ok((name, result)) = joined {
            let outcome = match result {
                Ok(out) if out.success => UnitOutcome::Success,
                Ok(out) => UnitOutcome::Failed { reason: out.detail },
                Err(e) => UnitOutcome::Failed {
                    reason: e.to_string(),
                },
            };
            outcomes.insert(name, outcome);
        }
    }

    let ordered = plan
        .ordered_units
        .iter()
        .map(|name| {
            let outcome = outcomes.remove(name).unwrap_or(UnitOutcome::Skipped {
                reason: "not dispatched".into(),
            });
            (name.clone(), outcome)
        })
        .collect();

    Ok(ApplyReport {
        stage: plan.stage,
        run_id: ctx.run_id.clone(),
        started_at,
        outcomes: ordered,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::plan;
    use crate::registry::DeployableUnit;
    use crate::types::UnitCategory;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn unit(name: &str, deps: &[&str]) -> DeployableUnit {
        DeployableUnit {
            name: name.into(),
            name_template: format!("{name}-{{stage}}"),
            category: UnitCategory::BackendService,
            path_prefixes: vec![],
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            outputs: vec![],
            tables: vec![],
        }
    }

    /// Scripted provisioner: fails the named units, records start order,
    /// and tracks peak concurrency.
    struct FakeProvisioner {
        fail: Vec<String>,
        delay: Duration,
        started: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl FakeProvisioner {
        fn new(fail: &[&str]) -> Self {
            FakeProvisioner {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                delay: Duration::from_millis(10),
                started: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Provisioner for FakeProvisioner {
        async fn provision(
            &self,
            unit: &DeployableUnit,
            _stack_name: &str,
            _ctx: &RunContext,
        ) -> Result<ProvisionOutput> {
            self.started.lock().unwrap().push(unit.name.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(&unit.name) {
                Ok(ProvisionOutput {
                    success: false,
                    detail: "exit 1: synth failed".into(),
                })
            } else {
                Ok(ProvisionOutput {
                    success: true,
                    detail: "deployed".into(),
                })
            }
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(Stage::Dev, "us-east-1")
    }

    async fn run(
        units: Vec<DeployableUnit>,
        requested: &[&str],
        fake: FakeProvisioner,
        opts: ApplyOptions,
    ) -> (ApplyReport, Arc<FakeProvisioner>) {
        let reg = Registry::new(units).unwrap();
        let requested: Vec<String> = requested.iter().map(|s| s.to_string()).collect();
        let p = plan(&reg, &requested, Stage::Dev).unwrap();
        let fake = Arc::new(fake);
        let report = apply(&p, &reg, fake.clone(), &ctx(), &opts)
            .await
            .unwrap();
        (report, fake)
    }

    #[tokio::test]
    async fn all_units_succeed() {
        let (report, _) = run(
            vec![unit("a", &[]), unit("b", &["a"])],
            &["b"],
            FakeProvisioner::new(&[]),
            ApplyOptions::default(),
        )
        .await;
        assert!(report.ok());
        assert_eq!(report.outcomes.len(), 2);
    }

    #[tokio::test]
    async fn failure_skips_transitive_dependents() {
        let (report, _) = run(
            vec![unit("a", &[]), unit("b", &["a"]), unit("c", &["b"])],
            &["c"],
            FakeProvisioner::new(&["a"]),
            ApplyOptions::default(),
        )
        .await;
        assert!(!report.ok());
        assert!(matches!(
            report.outcome_of("a"),
            Some(UnitOutcome::Failed { .. })
        ));
        assert!(matches!(
            report.outcome_of("b"),
            Some(UnitOutcome::Skipped { .. })
        ));
        assert!(matches!(
            report.outcome_of("c"),
            Some(UnitOutcome::Skipped { .. })
        ));
        assert_eq!(report.failed_subtree(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn independent_branch_survives_failure() {
        let (report, fake) = run(
            vec![unit("a", &[]), unit("b", &["a"]), unit("x", &[])],
            &["b", "x"],
            FakeProvisioner::new(&["a"]),
            ApplyOptions::default(),
        )
        .await;
        assert!(matches!(
            report.outcome_of("x"),
            Some(UnitOutcome::Success)
        ));
        assert!(matches!(
            report.outcome_of("b"),
            Some(UnitOutcome::Skipped { .. })
        ));
        // x was actually attempted, not just assumed.
        assert!(fake.started.lock().unwrap().contains(&"x".to_string()));
    }

    #[tokio::test]
    async fn serialized_execution_follows_plan_order() {
        let (report, fake) = run(
            vec![
                unit("base", &[]),
                unit("mid", &["base"]),
                unit("top", &["mid"]),
                unit("side", &["base"]),
            ],
            &["top", "side"],
            FakeProvisioner::new(&[]),
            ApplyOptions {
                max_parallelism: 1,
                ..Default::default()
            },
        )
        .await;
        assert!(report.ok());
        let started = fake.started.lock().unwrap().clone();
        assert_eq!(started[0], "base");
        let pos = |n: &str| started.iter().position(|s| s == n).unwrap();
        assert!(pos("mid") < pos("top"));
    }

    #[tokio::test]
    async fn parallelism_is_bounded() {
        let units: Vec<DeployableUnit> =
            ["a", "b", "c", "d", "e"].iter().map(|n| unit(n, &[])).collect();
        let names: Vec<&str> = vec!["a", "b", "c", "d", "e"];
        let (report, fake) = run(
            units,
            &names,
            FakeProvisioner::new(&[]),
            ApplyOptions {
                max_parallelism: 2,
                ..Default::default()
            },
        )
        .await;
        assert!(report.ok());
        assert!(fake.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn timeout_is_a_failure_not_a_panic() {
        let mut fake = FakeProvisioner::new(&[]);
        fake.delay = Duration::from_millis(200);
        let (report, _) = run(
            vec![unit("slow", &[])],
            &["slow"],
            fake,
            ApplyOptions {
                max_parallelism: 1,
                unit_timeout: Duration::from_millis(20),
            },
        )
        .await;
        match report.outcome_of("slow") {
            Some(UnitOutcome::Failed { reason }) => assert!(reason.contains("timed out")),
            other => panic!("expected timeout failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_provisioner_success_and_failure() {
        let ctx = ctx();
        let u = unit("a", &[]);
        let ok = CommandProvisioner::new("true")
            .provision(&u, "a-dev", &ctx)
            .await
            .unwrap();
        assert!(ok.success);
        let bad = CommandProvisioner::new("false")
            .provision(&u, "a-dev", &ctx)
            .await
            .unwrap();
        assert!(!bad.success);
        assert!(bad.detail.starts_with("exit 1"));
    }

    #[tokio::test]
    async fn command_provisioner_renders_placeholders() {
        let p = CommandProvisioner::new("deploy {stack} --stage {stage} --region {region}");
        let argv = p.render(&unit("a", &[]), "a-dev", &ctx());
        assert_eq!(
            argv,
            vec!["deploy", "a-dev", "--stage", "dev", "--region", "us-east-1"]
        );
    }

    #[tokio::test]
    async fn command_provisioner_missing_binary_fails_unit() {
        let (report, _) = {
            let reg = Registry::new(vec![unit("a", &[])]).unwrap();
            let p = plan(&reg, &["a".to_string()], Stage::Dev).unwrap();
            let prov = Arc::new(CommandProvisioner::new("stagehand-no-such-binary {stack}"));
            let report = apply(&p, &reg, prov, &ctx(), &ApplyOptions::default())
                .await
                .unwrap();
            (report, ())
        };
        assert!(matches!(
            report.outcome_of("a"),
            Some(UnitOutcome::Failed { .. })
        ));
    }
}
