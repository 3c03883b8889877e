use crate::error::Result;
use crate::io;
use crate::registry::{DeployableUnit, Registry};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "stagehand.yaml";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// StoreBackend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreBackend {
    /// AWS SSM Parameter Store via the aws CLI.
    Ssm,
    /// JSON document on disk; local development and tests.
    File { path: PathBuf },
    /// In-process only; values do not survive the run.
    Memory,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Ssm
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_region")]
    pub region: String,
    /// Command template run once per unit. Placeholders: `{stack}`,
    /// `{stage}`, `{region}`, `{unit}`.
    #[serde(default = "default_provisioner")]
    pub provisioner: String,
    #[serde(default)]
    pub store: StoreBackend,
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    #[serde(default = "default_unit_timeout")]
    pub unit_timeout_seconds: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Overrides the builtin unit graph when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<Vec<DeployableUnit>>,
}

fn default_version() -> u32 {
    1
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_provisioner() -> String {
    "cdk deploy {stack} --require-approval never --context stage={stage}".to_string()
}

fn default_max_parallelism() -> usize {
    // Matches the fully serialized CI pipeline unless raised.
    1
}

fn default_unit_timeout() -> u64 {
    1800
}

impl Default for Config {
    fn default() -> Self {
        Config {
            version: default_version(),
            region: default_region(),
            provisioner: default_provisioner(),
            store: StoreBackend::default(),
            max_parallelism: default_max_parallelism(),
            unit_timeout_seconds: default_unit_timeout(),
            retry: RetryPolicy::default(),
            units: None,
        }
    }
}

impl Config {
    pub fn path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// Load `stagehand.yaml` from the project root; a missing file means
    /// defaults (builtin registry, serialized execution).
    pub fn load(root: &Path) -> Result<Self> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(Config::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        io::atomic_write(&Self::path(root), data.as_bytes())
    }

    /// Build the unit registry, either the configured override or the
    /// builtin graph.
    /// Graph validation (unknown deps, cycles, templates) happens here,
    /// before any provisioning call.
    pub fn registry(&self) -> Result<Registry> {
        match &self.units {
            Some(units) => Registry::new(units.clone()),
            None => Ok(Registry::builtin()),
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.provisioner.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "provisioner command is empty".to_string(),
            });
        }
        if self.max_parallelism == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "max_parallelism must be at least 1".to_string(),
            });
        }
        if self.max_parallelism > 16 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "max_parallelism={} will hit provider rate limits",
                    self.max_parallelism
                ),
            });
        }
        if self.retry.attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "retry.attempts=0 is treated as 1".to_string(),
            });
        }
        if self.retry.attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!("retry.attempts={} (>10 is unusual)", self.retry.attempts),
            });
        }
        if let Err(e) = self.registry() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("unit graph invalid: {e}"),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.max_parallelism, 1);
        assert_eq!(parsed.store, StoreBackend::Ssm);
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.provisioner, default_provisioner());
        assert!(cfg.units.is_none());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.region = "eu-west-1".into();
        cfg.max_parallelism = 3;
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.region, "eu-west-1");
        assert_eq!(loaded.max_parallelism, 3);
    }

    #[test]
    fn minimal_yaml_backward_compat() {
        // A bare version key must still deserialize with defaults.
        let cfg: Config = serde_yaml::from_str("version: 1\n").unwrap();
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.unit_timeout_seconds, 1800);
        assert_eq!(cfg.retry, RetryPolicy::default());
    }

    #[test]
    fn store_backend_yaml_tagged() {
        let file = StoreBackend::File {
            path: PathBuf::from(".stagehand/params.json"),
        };
        let yaml = serde_yaml::to_string(&file).unwrap();
        assert!(yaml.contains("type: file"));
        let parsed: StoreBackend = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, file);
    }

    #[test]
    fn registry_defaults_to_builtin() {
        let cfg = Config::default();
        let reg = cfg.registry().unwrap();
        assert!(reg.contains("infrastructure"));
    }

    #[test]
    fn units_override_replaces_builtin() {
        let yaml = r#"
version: 1
units:
  - name: app
    name_template: app-{stage}
    category: backend-service
    path_prefixes: ["app/"]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let reg = cfg.registry().unwrap();
        assert_eq!(reg.units().len(), 1);
        assert!(!reg.contains("infrastructure"));
    }

    #[test]
    fn validate_clean_config_no_warnings() {
        assert!(Config::default().validate().is_empty());
    }

    #[test]
    fn validate_flags_empty_provisioner() {
        let mut cfg = Config::default();
        cfg.provisioner = "  ".into();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("provisioner")));
    }

    #[test]
    fn validate_flags_zero_parallelism() {
        let mut cfg = Config::default();
        cfg.max_parallelism = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("max_parallelism")));
    }

    #[test]
    fn validate_flags_bad_unit_graph() {
        let yaml = r#"
version: 1
units:
  - name: a
    name_template: a-{stage}
    category: frontend
    dependencies: [b]
  - name: b
    name_template: b-{stage}
    category: frontend
    dependencies: [a]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("unit graph")));
    }
}
