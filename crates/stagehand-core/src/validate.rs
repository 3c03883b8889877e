//! Post-deploy validation of the data layer.
//!
//! Read-only diagnostic: renders each expected table name with the stage,
//! probes the live data store for it, and reports the found/missing split.
//! It never creates or repairs anything; remediation is re-running the
//! orchestrator for the owning unit.

use crate::context::RunContext;
use crate::error::{Result, StagehandError};
use crate::registry::Registry;
use crate::retry::{retry_blocking, RetryPolicy};
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::process::Command;

// ---------------------------------------------------------------------------
// TableProbe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub index_count: u32,
}

pub trait TableProbe {
    /// `Ok(None)` means the table is confirmed absent. `Err` means the
    /// data layer could not be reached, which callers must report as a
    /// fault of the validator run, not as a missing table.
    fn probe(&self, table_name: &str) -> Result<Option<TableInfo>>;
}

/// Shells out to `aws dynamodb describe-table`.
pub struct DynamoCli {
    region: String,
    retry: RetryPolicy,
}

impl DynamoCli {
    pub fn new(region: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        which::which("aws").map_err(|_| StagehandError::CloudCliMissing("aws".into()))?;
        Ok(DynamoCli {
            region: region.into(),
            retry,
        })
    }
}

impl TableProbe for DynamoCli {
    fn probe(&self, table_name: &str) -> Result<Option<TableInfo>> {
        retry_blocking(self.retry, || {
            let output = Command::new("aws")
                .args([
                    "dynamodb",
                    "describe-table",
                    "--table-name",
                    table_name,
                    "--region",
                    self.region.as_str(),
                    "--output",
                    "json",
                ])
                .output()
                .map_err(|e| StagehandError::SpawnFailed {
                    command: "aws dynamodb describe-table".into(),
                    reason: e.to_string(),
                })?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("ResourceNotFoundException") {
                    return Ok(None);
                }
                return Err(StagehandError::CloudCliFailed {
                    command: "aws dynamodb describe-table".into(),
                    code: output.status.code().unwrap_or(-1),
                    stderr: stderr.trim().to_string(),
                });
            }

            let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
            if doc.pointer("/Table").is_none() {
                return Err(StagehandError::MalformedResponse {
                    origin: "dynamodb describe-table".into(),
                    detail: format!("no Table block for '{table_name}'"),
                });
            }
            let index_count = doc
                .pointer("/Table/GlobalSecondaryIndexes")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u32)
                .unwrap_or(0);
            Ok(Some(TableInfo { index_count }))
        })
    }
}

/// Map-backed probe for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticProbe {
    tables: HashMap<String, TableInfo>,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, index_count: u32) -> Self {
        self.tables
            .insert(name.to_string(), TableInfo { index_count });
        self
    }
}

impl TableProbe for StaticProbe {
    fn probe(&self, table_name: &str) -> Result<Option<TableInfo>> {
        Ok(self.tables.get(table_name).copied())
    }
}

// ---------------------------------------------------------------------------
// ValidationReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupCounts {
    pub expected: usize,
    pub found: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub stage: Stage,
    /// Rendered table names, grouped by owning unit.
    pub expected: BTreeMap<String, Vec<String>>,
    pub found: Vec<String>,
    pub missing: Vec<String>,
    /// Tables whose live secondary-index count is below the declared
    /// minimum. Flagged, never fatal.
    pub index_warnings: Vec<String>,
    pub counts_by_group: BTreeMap<String, GroupCounts>,
}

impl ValidationReport {
    /// False when any expected table is absent. Transport faults never
    /// reach this: they surface as errors from `validate` itself.
    pub fn ok(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Probe every expected table for the stage. `unit_filter` restricts the
/// check to the named units; `None` validates the whole registry.
pub fn validate(
    ctx: &RunContext,
    registry: &Registry,
    unit_filter: Option<&[String]>,
    probe: &dyn TableProbe,
) -> Result<ValidationReport> {
    let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut found = Vec::new();
    let mut missing = Vec::new();
    let mut index_warnings = Vec::new();
    let mut counts_by_group = BTreeMap::new();

    for unit in registry.units() {
        if let Some(filter) = unit_filter {
            if !filter.contains(&unit.name) {
                continue;
            }
        }
        if unit.tables.is_empty() {
            continue;
        }

        let mut group = GroupCounts::default();
        let mut names = Vec::new();
        for spec in &unit.tables {
            let table_name = spec.table_name(ctx.stage);
            group.expected += 1;
            match probe.probe(&table_name)? {
                Some(info) => {
                    if let Some(min) = spec.min_index_count {
                        if info.index_count < min {
                            index_warnings.push(format!(
                                "{table_name}: {} secondary index(es), expected at least {min}",
                                info.index_count
                            ));
                        }
                    }
                    group.found += 1;
                    found.push(table_name.clone());
                }
                None => {
                    group.missing += 1;
                    missing.push(table_name.clone());
                }
            }
            names.push(table_name);
        }
        expected.insert(unit.name.clone(), names);
        counts_by_group.insert(unit.name.clone(), group);
    }

    Ok(ValidationReport {
        stage: ctx.stage,
        expected,
        found,
        missing,
        index_warnings,
        counts_by_group,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
