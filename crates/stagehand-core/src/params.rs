//! Shared parameter store: deterministic key derivation, pluggable
//! backends, and reconciliation of stack outputs into the store.
//!
//! Keys are a pure function of (namespace, stage, category, logical name),
//! and every write is an upsert, so running reconciliation twice with the
//! same inputs leaves the store byte-identical to running it once. The
//! reconciler is the only writer path; per-stage key prefixes keep
//! concurrent runs for different stages out of each other's way.

use crate::context::RunContext;
use crate::error::{Result, StagehandError};
use crate::io::atomic_write;
use crate::outputs::StackOutputs;
use crate::registry::Registry;
use crate::retry::{retry_blocking, RetryPolicy};
use crate::types::Stage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

/// `/{namespace}/{stage}/{category}/{logical-name}`; re-deriving with the
/// same inputs always yields the identical string.
pub fn parameter_key(namespace: &str, stage: Stage, category: &str, logical_name: &str) -> String {
    format!("/{namespace}/{stage}/{category}/{logical_name}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub key: String,
    pub value: String,
    pub description: String,
}

// ---------------------------------------------------------------------------
// ParameterStore
// ---------------------------------------------------------------------------

pub trait ParameterStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Create-or-overwrite. Never appends, never duplicates.
    fn put(&self, record: &ParameterRecord) -> Result<()>;
    /// Returns true when the key existed.
    fn delete(&self, key: &str) -> Result<bool>;
    fn list(&self, prefix: &str) -> Result<Vec<ParameterRecord>>;
}

/// Read with the documented fallback: an unreachable store or a missing
/// key yields `default`, so application startup never blocks on this
/// subsystem.
pub fn get_or_default(store: &dyn ParameterStore, key: &str, default: &str) -> String {
    match store.get(key) {
        Ok(Some(value)) => value,
        Ok(None) => default.to_string(),
        Err(e) => {
            tracing::warn!(key, error = %e, "parameter store unreachable, using default");
            default.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, ParameterRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ParameterStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(key)
            .map(|r| r.value.clone()))
    }

    fn put(&self, record: &ParameterRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records.lock().unwrap().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<ParameterRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// FileStore
// ---------------------------------------------------------------------------

/// JSON document on disk, rewritten atomically on every mutation. Local
/// development and integration-test backend.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    fn load(&self) -> Result<BTreeMap<String, ParameterRecord>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn save(&self, records: &BTreeMap<String, ParameterRecord>) -> Result<()> {
        let data = serde_json::to_string_pretty(records)?;
        atomic_write(&self.path, data.as_bytes())
    }
}

impl ParameterStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.get(key).map(|r| r.value.clone()))
    }

    fn put(&self, record: &ParameterRecord) -> Result<()> {
        let mut records = self.load()?;
        records.insert(record.key.clone(), record.clone());
        self.save(&records)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut records = self.load()?;
        let existed = records.remove(key).is_some();
        if existed {
            self.save(&records)?;
        }
        Ok(existed)
    }

    fn list(&self, prefix: &str) -> Result<Vec<ParameterRecord>> {
        Ok(self
            .load()?
            .values()
            .filter(|r| r.key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SsmCliStore
// ---------------------------------------------------------------------------

/// Backend over the `aws ssm` CLI with bounded retry on transport faults.
pub struct SsmCliStore {
    region: String,
    retry: RetryPolicy,
}

impl SsmCliStore {
    pub fn new(region: impl Into<String>, retry: RetryPolicy) -> Result<Self> {
        which::which("aws").map_err(|_| StagehandError::CloudCliMissing("aws".into()))?;
        Ok(SsmCliStore {
            region: region.into(),
            retry,
        })
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new("aws")
            .args(["ssm"])
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"])
            .output()
            .map_err(|e| StagehandError::SpawnFailed {
                command: format!("aws ssm {}", args.first().unwrap_or(&"")),
                reason: e.to_string(),
            })
    }

    fn fail(args: &[&str], output: &std::process::Output) -> StagehandError {
        StagehandError::CloudCliFailed {
            command: format!("aws ssm {}", args.first().unwrap_or(&"")),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}

impl ParameterStore for SsmCliStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        retry_blocking(self.retry, || {
            let args = ["get-parameter", "--name", key];
            let output = self.run(&args)?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("ParameterNotFound") {
                    return Ok(None);
                }
                return Err(Self::fail(&args, &output));
            }
            let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
            Ok(doc
                .pointer("/Parameter/Value")
                .and_then(|v| v.as_str())
                .map(str::to_string))
        })
    }

    fn put(&self, record: &ParameterRecord) -> Result<()> {
        retry_blocking(self.retry, || {
            let args = [
                "put-parameter",
                "--name",
                record.key.as_str(),
                "--value",
                record.value.as_str(),
                "--description",
                record.description.as_str(),
                "--type",
                "String",
                "--overwrite",
            ];
            let output = self.run(&args)?;
            if !output.status.success() {
                return Err(Self::fail(&args, &output));
            }
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        retry_blocking(self.retry, || {
            let args = ["delete-parameter", "--name", key];
            let output = self.run(&args)?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if stderr.contains("ParameterNotFound") {
                    return Ok(false);
                }
                return Err(Self::fail(&args, &output));
            }
            Ok(true)
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<ParameterRecord>> {
        retry_blocking(self.retry, || {
            let args = [
                "get-parameters-by-path",
                "--path",
                prefix,
                "--recursive",
            ];
            let output = self.run(&args)?;
            if !output.status.success() {
                return Err(Self::fail(&args, &output));
            }
            let doc: serde_json::Value = serde_json::from_slice(&output.stdout)?;
            let params = doc
                .pointer("/Parameters")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();
            Ok(params
                .iter()
                .filter_map(|p| {
                    let key = p.get("Name")?.as_str()?.to_string();
                    let value = p.get("Value")?.as_str()?.to_string();
                    Some(ParameterRecord {
                        key,
                        value,
                        description: String::new(),
                    })
                })
                .collect())
        })
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub written: Vec<ParameterRecord>,
    /// Keys whose source output was not available (unit mid-rollout or
    /// never deployed). Warnings, not failures.
    pub missing: Vec<String>,
    /// (key, reason) for reads/writes that errored. Collected, never
    /// aborting the remaining keys.
    pub failed: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pull the declared outputs of `units` from the provider and upsert them
/// into the store under their deterministic keys. Safe to run repeatedly
/// and safe to run after a partial deployment.
pub fn reconcile(
    ctx: &RunContext,
    registry: &Registry,
    units: &[String],
    outputs: &dyn StackOutputs,
    store: &dyn ParameterStore,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    for name in units {
        let unit = registry.get(name)?;
        let stack_name = unit.stack_name(ctx.stage);
        for spec in &unit.outputs {
            let key = parameter_key(
                &spec.namespace,
                ctx.stage,
                &spec.param_category,
                &spec.logical_name,
            );
            let value = match outputs.output(&stack_name, &spec.provider_key) {
                Ok(Some(v)) => v,
                Ok(None) => {
                    tracing::warn!(
                        key,
                        stack = %stack_name,
                        output = %spec.provider_key,
                        "output not available, skipping"
                    );
                    report.missing.push(key);
                    continue;
                }
                Err(e) => {
                    report.failed.push((key, e.to_string()));
                    continue;
                }
            };
            let record = ParameterRecord {
                key: key.clone(),
                value,
                description: format!(
                    "{} output {} ({})",
                    unit.name, spec.provider_key, ctx.stage
                ),
            };
            match store.put(&record) {
                Ok(()) => report.written.push(record),
                Err(e) => report.failed.push((key, e.to_string())),
            }
        }
    }

    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::StaticOutputs;
    use tempfile::TempDir;

    fn ctx() -> RunContext {
        RunContext::new(Stage::Dev, "us-east-1")
    }

    #[test]
    fn key_derivation_is_pure() {
        let a = parameter_key("tsa", Stage::Dev, "api-urls", "auth");
        let b = parameter_key("tsa", Stage::Dev, "api-urls", "auth");
        assert_eq!(a, b);
        assert_eq!(a, "/tsa/dev/api-urls/auth");
        assert_eq!(
            parameter_key("tsa-shared", Stage::Dev, "table-names", "users"),
            "/tsa-shared/dev/table-names/users"
        );
    }

    #[test]
    fn stage_isolates_keys() {
        let dev = parameter_key("tsa", Stage::Dev, "api-urls", "auth");
        let prod = parameter_key("tsa", Stage::Prod, "api-urls", "auth");
        assert_ne!(dev, prod);
    }

    #[test]
    fn memory_store_upsert_is_last_write_wins() {
        let store = MemoryStore::new();
        let key = "/tsa/dev/api-urls/auth";
        store
            .put(&ParameterRecord {
                key: key.into(),
                value: "https://a.example.com".into(),
                description: String::new(),
            })
            .unwrap();
        store
            .put(&ParameterRecord {
                key: key.into(),
                value: "https://b.example.com".into(),
                description: String::new(),
            })
            .unwrap();
        assert_eq!(store.get(key).unwrap().as_deref(), Some("https://b.example.com"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn file_store_roundtrip_and_upsert() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("params.json"));
        let key = "/tsa/dev/api-urls/auth";
        for value in ["https://a.example.com", "https://b.example.com"] {
            store
                .put(&ParameterRecord {
                    key: key.into(),
                    value: value.into(),
                    description: "auth url".into(),
                })
                .unwrap();
        }
        assert_eq!(store.get(key).unwrap().as_deref(), Some("https://b.example.com"));
        assert_eq!(store.list("/tsa/dev/").unwrap().len(), 1);
        assert!(store.delete(key).unwrap());
        assert!(!store.delete(key).unwrap());
        assert_eq!(store.get(key).unwrap(), None);
    }

    #[test]
    fn file_store_list_filters_by_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("params.json"));
        for (ns, stage) in [("tsa", Stage::Dev), ("tsa", Stage::Prod)] {
            store
                .put(&ParameterRecord {
                    key: parameter_key(ns, stage, "api-urls", "auth"),
                    value: "x".into(),
                    description: String::new(),
                })
                .unwrap();
        }
        assert_eq!(store.list("/tsa/dev/").unwrap().len(), 1);
        assert_eq!(store.list("/tsa/").unwrap().len(), 2);
    }

    #[test]
    fn get_or_default_on_miss() {
        let store = MemoryStore::new();
        let value = get_or_default(&store, "/tsa/dev/api-urls/auth", "http://localhost:3000");
        assert_eq!(value, "http://localhost:3000");
    }

    #[test]
    fn reconcile_writes_declared_outputs() {
        let reg = Registry::builtin();
        let outputs = StaticOutputs::new()
            .with("tsa-coach-backend-dev", "CoachApiUrl", "https://coach.example.com")
            .with("tsa-coach-backend-dev", "PasswordlessAuthUrl", "https://auth.example.com");
        let store = MemoryStore::new();
        let report = reconcile(
            &ctx(),
            &reg,
            &["coach-backend".to_string()],
            &outputs,
            &store,
        )
        .unwrap();
        assert!(report.ok());
        assert_eq!(report.written.len(), 2);
        assert!(report.missing.is_empty());
        assert_eq!(
            store.get("/tsa/dev/api-urls/auth").unwrap().as_deref(),
            Some("https://auth.example.com")
        );
        assert_eq!(
            store.get("/tsa/dev/api-urls/coach").unwrap().as_deref(),
            Some("https://coach.example.com")
        );
    }

    #[test]
    fn reconcile_is_idempotent() {
        let reg = Registry::builtin();
        let outputs = StaticOutputs::new()
            .with("tsa-coach-backend-dev", "CoachApiUrl", "https://coach.example.com")
            .with("tsa-coach-backend-dev", "PasswordlessAuthUrl", "https://auth.example.com");
        let store = MemoryStore::new();
        let units = vec!["coach-backend".to_string()];
        reconcile(&ctx(), &reg, &units, &outputs, &store).unwrap();
        let first: Vec<_> = store.list("/").unwrap();
        reconcile(&ctx(), &reg, &units, &outputs, &store).unwrap();
        let second: Vec<_> = store.list("/").unwrap();
        assert_eq!(first, second);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reconcile_missing_output_is_warning_not_failure() {
        let reg = Registry::builtin();
        // Only one of coach-backend's two outputs is live.
        let outputs =
            StaticOutputs::new().with("tsa-coach-backend-dev", "CoachApiUrl", "https://c.example.com");
        let store = MemoryStore::new();
        let report = reconcile(
            &ctx(),
            &reg,
            &["coach-backend".to_string()],
            &outputs,
            &store,
        )
        .unwrap();
        assert!(report.ok());
        assert_eq!(report.written.len(), 1);
        assert_eq!(report.missing, vec!["/tsa/dev/api-urls/auth".to_string()]);
    }

    #[test]
    fn reconcile_collects_write_failures_per_key() {
        struct FailingStore;
        impl ParameterStore for FailingStore {
            fn get(&self, _key: &str) -> Result<Option<String>> {
                Ok(None)
            }
            fn put(&self, _record: &ParameterRecord) -> Result<()> {
                Err(StagehandError::Transport {
                    attempts: 3,
                    reason: "ssm unreachable".into(),
                })
            }
            fn delete(&self, _key: &str) -> Result<bool> {
                Ok(false)
            }
            fn list(&self, _prefix: &str) -> Result<Vec<ParameterRecord>> {
                Ok(vec![])
            }
        }

        let reg = Registry::builtin();
        let outputs = StaticOutputs::new()
            .with("tsa-coach-backend-dev", "CoachApiUrl", "https://c.example.com")
            .with("tsa-coach-backend-dev", "PasswordlessAuthUrl", "https://a.example.com");
        let report = reconcile(
            &ctx(),
            &reg,
            &["coach-backend".to_string()],
            &outputs,
            &FailingStore,
        )
        .unwrap();
        assert!(!report.ok());
        // Both keys were attempted; neither aborted the other.
        assert_eq!(report.failed.len(), 2);
        assert!(report.written.is_empty());
    }
}
