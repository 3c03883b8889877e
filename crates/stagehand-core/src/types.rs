use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A named deployment environment. The stage is rendered into every stack
/// name and every parameter key, so runs against different stages never
/// touch each other's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dev,
    Staging,
    Prod,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[Stage::Dev, Stage::Staging, Stage::Prod]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Staging => "staging",
            Stage::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = crate::error::StagehandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Stage::Dev),
            "staging" => Ok(Stage::Staging),
            "prod" => Ok(Stage::Prod),
            _ => Err(crate::error::StagehandError::InvalidStage(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// UnitCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitCategory {
    Infrastructure,
    BackendService,
    Frontend,
}

impl UnitCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            UnitCategory::Infrastructure => "infrastructure",
            UnitCategory::BackendService => "backend-service",
            UnitCategory::Frontend => "frontend",
        }
    }
}

impl fmt::Display for UnitCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// UnitOutcome
// ---------------------------------------------------------------------------

/// Terminal state of one unit within a single run. Provisioning failures
/// are data, not errors: the executor records them here so the summary can
/// always enumerate every unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    Success,
    Failed { reason: String },
    Skipped { reason: String },
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UnitOutcome::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Success => "success",
            UnitOutcome::Failed { .. } => "failed",
            UnitOutcome::Skipped { .. } => "skipped",
        }
    }
}

impl fmt::Display for UnitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitOutcome::Success => f.write_str("success"),
            UnitOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            UnitOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
