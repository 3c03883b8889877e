//! Static declaration of deployable units and their dependency graph.
//!
//! The registry is built once per run (from `stagehand.yaml` or the builtin
//! platform definition) and never mutated afterwards. Registration order is
//! load-bearing: the planner uses it as the deterministic tie-break when
//! several units are simultaneously ready.

use crate::error::{Result, StagehandError};
use crate::types::{Stage, UnitCategory};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ---------------------------------------------------------------------------
// OutputSpec / TableSpec
// ---------------------------------------------------------------------------

/// One cross-stack output a unit publishes after deployment.
///
/// Centralizes the mapping from a logical name to the provider-specific
/// CloudFormation output key, so the naming convention lives in exactly one
/// place instead of being re-derived ad hoc by every consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSpec {
    /// Logical name, last segment of the parameter key (e.g. "auth").
    pub logical_name: String,
    /// Parameter-store namespace this output is published under.
    pub namespace: String,
    /// Key grouping segment (e.g. "api-urls", "table-names").
    pub param_category: String,
    /// CloudFormation output key on the owning stack.
    pub provider_key: String,
}

/// One persisted table the owning unit is expected to have created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name with a `{stage}` placeholder, e.g. `users-{stage}`.
    pub name_template: String,
    /// Minimum number of secondary indexes; fewer is flagged, not fatal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_index_count: Option<u32>,
}

impl TableSpec {
    pub fn table_name(&self, stage: Stage) -> String {
        self.name_template.replace("{stage}", stage.as_str())
    }
}

// ---------------------------------------------------------------------------
// DeployableUnit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployableUnit {
    pub name: String,
    /// Stack name with a `{stage}` placeholder, e.g. `tsa-coach-backend-{stage}`.
    pub name_template: String,
    pub category: UnitCategory,
    /// Source path prefixes that mark this unit as changed.
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    /// Names of units that must reach success before this one starts.
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableSpec>,
}

impl DeployableUnit {
    pub fn stack_name(&self, stage: Stage) -> String {
        self.name_template.replace("{stage}", stage.as_str())
    }

    pub fn matches_path(&self, path: &str) -> bool {
        self.path_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Registry {
    units: Vec<DeployableUnit>,
}

impl Registry {
    /// Build a registry from an ordered unit list, rejecting duplicate
    /// names, unknown dependencies, bad templates, and cycles up front so
    /// no provisioning call is ever made against a malformed graph.
    pub fn new(units: Vec<DeployableUnit>) -> Result<Self> {
        let registry = Registry { units };
        registry.validate()?;
        Ok(registry)
    }

    pub fn units(&self) -> &[DeployableUnit] {
        &self.units
    }

    pub fn get(&self, name: &str) -> Result<&DeployableUnit> {
        self.units
            .iter()
            .find(|u| u.name == name)
            .ok_or_else(|| StagehandError::UnitNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.units.iter().any(|u| u.name == name)
    }

    /// Direct dependencies of `name`, in their declared order.
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<&DeployableUnit>> {
        let unit = self.get(name)?;
        unit.dependencies.iter().map(|d| self.get(d)).collect()
    }

    /// Units that depend on `name`, directly or transitively.
    pub fn dependents_of(&self, name: &str) -> Result<Vec<&DeployableUnit>> {
        self.get(name)?;
        let mut out = Vec::new();
        for unit in &self.units {
            if unit.name != name && self.depends_on(&unit.name, name)? {
                out.push(unit);
            }
        }
        Ok(out)
    }

    fn depends_on(&self, unit: &str, target: &str) -> Result<bool> {
        let mut stack: Vec<&str> = self.get(unit)?.dependencies.iter().map(String::as_str).collect();
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(dep) = stack.pop() {
            if dep == target {
                return Ok(true);
            }
            if seen.insert(dep) {
                stack.extend(self.get(dep)?.dependencies.iter().map(String::as_str));
            }
        }
        Ok(false)
    }

    fn validate(&self) -> Result<()> {
        let mut names: HashSet<&str> = HashSet::new();
        for unit in &self.units {
            if !names.insert(unit.name.as_str()) {
                return Err(StagehandError::DuplicateUnit(unit.name.clone()));
            }
            if !unit.name_template.contains("{stage}") {
                return Err(StagehandError::InvalidTemplate(unit.name_template.clone()));
            }
        }
        for unit in &self.units {
            for dep in &unit.dependencies {
                if !names.contains(dep.as_str()) {
                    return Err(StagehandError::UnknownDependency {
                        unit: unit.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        self.check_acyclic()
    }

    /// Iterative DFS with a three-color marking. A back edge to an
    /// in-progress node is a cycle.
    fn check_acyclic(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }

        let mut marks: Vec<Mark> = vec![Mark::White; self.units.len()];
        let index_of = |name: &str| self.units.iter().position(|u| u.name == name);

        for start in 0..self.units.len() {
            if marks[start] != Mark::White {
                continue;
            }
            // (unit index, next dependency index to visit)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Grey;
            while let Some(&mut (i, ref mut next)) = stack.last_mut() {
                let deps = &self.units[i].dependencies;
                if *next >= deps.len() {
                    marks[i] = Mark::Black;
                    stack.pop();
                    continue;
                }
                let dep_idx = index_of(&deps[*next]).expect("validated above");
                *next += 1;
                match marks[dep_idx] {
                    Mark::White => {
                        marks[dep_idx] = Mark::Grey;
                        stack.push((dep_idx, 0));
                    }
                    Mark::Grey => {
                        return Err(StagehandError::DependencyCycle(
                            self.units[dep_idx].name.clone(),
                        ));
                    }
                    Mark::Black => {}
                }
            }
        }
        Ok(())
    }

    /// The platform's static unit graph: infrastructure first, backends over
    /// it, frontends over their backends. Admin deploys after coach because
    /// its stack imports the coach API resources.
    pub fn builtin() -> Registry {
        let units = vec![
            DeployableUnit {
                name: "infrastructure".into(),
                name_template: "tsa-infrastructure-{stage}".into(),
                category: UnitCategory::Infrastructure,
                path_prefixes: vec!["tsa-infrastructure/".into()],
                dependencies: vec![],
                outputs: vec![
                    table_output("users", "UsersTableName"),
                    table_output("profiles", "ProfilesTableName"),
                    table_output("invitations", "InvitationsTableName"),
                    table_output("enrollments", "EnrollmentsTableName"),
                ],
                tables: vec![
                    TableSpec {
                        name_template: "users-{stage}".into(),
                        min_index_count: Some(1),
                    },
                    TableSpec {
                        name_template: "profiles-{stage}".into(),
                        min_index_count: Some(2),
                    },
                    TableSpec {
                        name_template: "invitations-{stage}".into(),
                        min_index_count: Some(1),
                    },
                    TableSpec {
                        name_template: "enrollments-{stage}".into(),
                        min_index_count: None,
                    },
                ],
            },
            DeployableUnit {
                name: "coach-backend".into(),
                name_template: "tsa-coach-backend-{stage}".into(),
                category: UnitCategory::BackendService,
                path_prefixes: vec!["tsa-coach-backend/".into()],
                dependencies: vec!["infrastructure".into()],
                outputs: vec![
                    api_output("coach", "CoachApiUrl"),
                    api_output("auth", "PasswordlessAuthUrl"),
                ],
                tables: vec![],
            },
            DeployableUnit {
                name: "admin-backend".into(),
                name_template: "tsa-admin-backend-{stage}".into(),
                category: UnitCategory::BackendService,
                path_prefixes: vec!["tsa-admin-backend/".into()],
                dependencies: vec!["infrastructure".into(), "coach-backend".into()],
                outputs: vec![api_output("admin", "AdminApiUrl")],
                tables: vec![],
            },
            DeployableUnit {
                name: "coach-frontend".into(),
                name_template: "tsa-coach-frontend-{stage}".into(),
                category: UnitCategory::Frontend,
                path_prefixes: vec!["tsa-platform-frontend/".into()],
                dependencies: vec!["coach-backend".into()],
                outputs: vec![],
                tables: vec![],
            },
            DeployableUnit {
                name: "parent-frontend".into(),
                name_template: "tsa-parent-frontend-{stage}".into(),
                category: UnitCategory::Frontend,
                path_prefixes: vec!["tsa-parent-frontend/".into()],
                dependencies: vec!["coach-backend".into()],
                outputs: vec![],
                tables: vec![],
            },
            DeployableUnit {
                name: "admin-frontend".into(),
                name_template: "tsa-admin-frontend-{stage}".into(),
                category: UnitCategory::Frontend,
                path_prefixes: vec!["tsa-admin-frontend/".into()],
                dependencies: vec!["admin-backend".into()],
                outputs: vec![],
                tables: vec![],
            },
        ];
        Registry::new(units).expect("builtin registry is well-formed")
    }
}

fn table_output(logical: &str, provider_key: &str) -> OutputSpec {
    OutputSpec {
        logical_name: logical.into(),
        namespace: "tsa-shared".into(),
        param_category: "table-names".into(),
        provider_key: provider_key.into(),
    }
}

fn api_output(logical: &str, provider_key: &str) -> OutputSpec {
    OutputSpec {
        logical_name: logical.into(),
        namespace: "tsa".into(),
        param_category: "api-urls".into(),
        provider_key: provider_key.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
